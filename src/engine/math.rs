// Minimal 3D vector math for the kinematic engine
// Right-handed frames throughout; angles in radians.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const Z: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Vec3) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * rhs.z - self.z * rhs.y,
            y: self.z * rhs.x - self.x * rhs.z,
            z: self.x * rhs.y - self.y * rhs.x,
        }
    }

    pub fn norm(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Returns the zero vector unchanged rather than dividing by zero.
    pub fn normalized(self) -> Vec3 {
        let n = self.norm();
        if n > f32::EPSILON {
            self * (1.0 / n)
        } else {
            self
        }
    }

    pub fn lerp(self, to: Vec3, t: f32) -> Vec3 {
        self + (to - self) * t
    }

    /// Rotate about an arbitrary unit axis (Rodrigues' formula)
    pub fn rotated_about(self, axis: Vec3, angle: f32) -> Vec3 {
        let (sin, cos) = angle.sin_cos();
        self * cos + axis.cross(self) * sin + axis * (axis.dot(self) * (1.0 - cos))
    }

    /// Rotate about the z axis
    pub fn rotated_z(self, angle: f32) -> Vec3 {
        let (sin, cos) = angle.sin_cos();
        Vec3 {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
            z: self.z,
        }
    }

    pub fn approx_eq(self, rhs: Vec3, tol: f32) -> bool {
        (self - rhs).norm() <= tol
    }
}

/// Wrap an angle into (-pi, pi]
pub fn wrap_angle(a: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut a = a % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

/// Read-only view of the body's orientation, lent to legs for the duration
/// of a call. Axes are unit world vectors; body coordinates are
/// x = front, y = left, z = normal (up).
#[derive(Debug, Clone, Copy)]
pub struct BodyFrame {
    pub front: Vec3,
    pub left: Vec3,
    pub normal: Vec3,
}

impl BodyFrame {
    pub const IDENTITY: BodyFrame = BodyFrame {
        front: Vec3::new(1.0, 0.0, 0.0),
        left: Vec3::new(0.0, 1.0, 0.0),
        normal: Vec3::Z,
    };

    /// World-axes vector -> body coordinates
    pub fn to_body(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.front), v.dot(self.left), v.dot(self.normal))
    }

    /// Body coordinates -> world-axes vector
    pub fn to_world(&self, v: Vec3) -> Vec3 {
        self.front * v.x + self.left * v.y + self.normal * v.z
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Vec3) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    const TOL: f32 = 1e-5;

    #[test]
    fn test_cross_follows_right_hand_rule() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert!(x.cross(y).approx_eq(Vec3::Z, TOL));
    }

    #[test]
    fn test_normalized_is_unit_or_zero() {
        assert!((Vec3::new(3.0, 4.0, 0.0).normalized().norm() - 1.0).abs() < TOL);
        assert_eq!(Vec3::ZERO.normalized(), Vec3::ZERO);
    }

    #[test]
    fn test_lerp_endpoints_and_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(10.0, -4.0, 2.0);
        assert!(a.lerp(b, 0.0).approx_eq(a, TOL));
        assert!(a.lerp(b, 1.0).approx_eq(b, TOL));
        assert!(a.lerp(b, 0.5).approx_eq(Vec3::new(5.0, -2.0, 1.0), TOL));
    }

    #[test]
    fn test_rotated_about_matches_rotated_z() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        let a = v.rotated_about(Vec3::Z, FRAC_PI_2);
        let b = v.rotated_z(FRAC_PI_2);
        assert!(a.approx_eq(b, TOL));
        assert!(a.approx_eq(Vec3::new(-2.0, 1.0, 3.0), TOL));
    }
}
