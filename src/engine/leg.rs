// Per-leg inverse kinematics and trajectory queue
//
// Coordinate conventions (verified by the round-trip tests below):
// - A leg's positions (origin, foot target, trajectory waypoints) live in
//   "plane space": world axes, relative to the plane origin.
// - The IK solve happens in body coordinates: the coxa yaws about the body
//   normal, measured from the leg's neutral `mount_yaw`; femur and tibia
//   solve a two-link problem in the vertical plane through the target
//   (law of cosines). Femur angle is elevation from the body's horizontal
//   plane; tibia angle is zero with the knee at a right angle.
// - Left-side servos are mirror-mounted, so geometric joint angles are
//   negated before being commanded on a left leg.

use std::f32::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::math::{wrap_angle, BodyFrame, Vec3};
use super::servo::{CalibrationPrompt, Servo};
use super::{EngineError, Result};
use crate::bus::Transport;
use crate::config::LegConfig;

/// Below this target distance the two-link solve degenerates
const REACH_EPS: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn sign(self) -> f32 {
        match self {
            Side::Right => 1.0,
            Side::Left => -1.0,
        }
    }
}

/// Segment lengths in millimeters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LegGeometry {
    pub femur: f32,
    pub tibia: f32,
    /// Horizontal offset from the coxa axis to the femur joint
    pub coxa_offset: f32,
    /// Vertical drop from the leg origin to the femur joint (positive down)
    pub z_offset: f32,
}

impl Default for LegGeometry {
    fn default() -> Self {
        Self {
            femur: 50.0,
            tibia: 80.0,
            coxa_offset: 25.0,
            z_offset: 0.0,
        }
    }
}

/// One trajectory waypoint: a target position and the time offset from the
/// previous waypoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    pub position: Vec3,
    pub delta_t_ms: u32,
}

/// Joint angles produced by the IK solve (geometric, before side
/// mirroring). `clamped` marks a target that had to be pulled back onto
/// the workspace boundary.
#[derive(Debug, Clone, Copy)]
pub struct IkSolution {
    pub coxa: f32,
    pub femur: f32,
    pub tibia: f32,
    pub clamped: bool,
}

pub struct Leg {
    index: usize,
    side: Side,
    mount_yaw: f32,
    origin: Vec3,
    init_origin: Vec3,
    target: Vec3,
    geometry: LegGeometry,
    servos: [Servo; 3],
    trajectory: Vec<Movement>,
}

impl Leg {
    pub fn from_config(index: usize, cfg: &LegConfig) -> Self {
        let servos = std::array::from_fn(|j| {
            let s = &cfg.servos[j];
            Servo::new(s.channel, s.joint, s.min_pulse, s.max_pulse)
        });
        let mut leg = Self {
            index,
            side: cfg.side,
            mount_yaw: cfg.mount_yaw,
            origin: cfg.mount,
            init_origin: cfg.mount,
            target: Vec3::ZERO,
            geometry: cfg.geometry,
            servos,
            trajectory: Vec::new(),
        };
        // Servos start at their calibrated midpoints; the matching foot
        // position is the zero-angle pose.
        leg.target = leg.forward(&IkSolution {
            coxa: 0.0,
            femur: 0.0,
            tibia: 0.0,
            clamped: false,
        });
        leg
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn init_origin(&self) -> Vec3 {
        self.init_origin
    }

    /// Last commanded foot target, relative to the leg origin
    pub fn target(&self) -> Vec3 {
        self.target
    }

    /// Foot position relative to the plane origin
    pub fn foot(&self) -> Vec3 {
        self.origin + self.target
    }

    pub fn geometry(&self) -> LegGeometry {
        self.geometry
    }

    pub fn servos(&self) -> &[Servo; 3] {
        &self.servos
    }

    pub fn servos_mut(&mut self) -> &mut [Servo; 3] {
        &mut self.servos
    }

    /// Solve joint angles for a target in body coordinates relative to the
    /// leg origin. Unreachable targets are clamped onto the nearest point
    /// of the workspace boundary and flagged.
    pub fn solve(&self, local: Vec3) -> IkSolution {
        let g = &self.geometry;

        let azimuth = local.y.atan2(local.x);
        let coxa = wrap_angle(azimuth - self.mount_yaw);

        let mut radial = (local.x * local.x + local.y * local.y).sqrt() - g.coxa_offset;
        let mut height = local.z + g.z_offset;

        let d = (radial * radial + height * height).sqrt();
        let d_min = (g.femur - g.tibia).abs().max(REACH_EPS);
        let d_max = g.femur + g.tibia;
        let dc = d.clamp(d_min, d_max);
        let clamped = (dc - d).abs() > REACH_EPS;

        if d > REACH_EPS {
            let scale = dc / d;
            radial *= scale;
            height *= scale;
        } else {
            radial = dc;
            height = 0.0;
        }

        let reach_angle = ((g.femur * g.femur + dc * dc - g.tibia * g.tibia)
            / (2.0 * g.femur * dc))
            .clamp(-1.0, 1.0)
            .acos();
        let femur = height.atan2(radial) + reach_angle;

        let knee = ((g.femur * g.femur + g.tibia * g.tibia - dc * dc)
            / (2.0 * g.femur * g.tibia))
            .clamp(-1.0, 1.0)
            .acos();
        let tibia = knee - FRAC_PI_2;

        IkSolution {
            coxa,
            femur,
            tibia,
            clamped,
        }
    }

    /// Foot position (body coordinates, relative to the leg origin) for a
    /// set of joint angles. Inverse of `solve` for in-workspace targets.
    pub fn forward(&self, sol: &IkSolution) -> Vec3 {
        let g = &self.geometry;
        let azimuth = self.mount_yaw + sol.coxa;
        let dir = Vec3::new(azimuth.cos(), azimuth.sin(), 0.0);

        let knee = sol.tibia + FRAC_PI_2;
        let shin = sol.femur + knee - PI;
        let radial = g.femur * sol.femur.cos() + g.tibia * shin.cos();
        let height = g.femur * sol.femur.sin() + g.tibia * shin.sin();

        dir * (g.coxa_offset + radial) + Vec3::Z * (height - g.z_offset)
    }

    /// Place the foot at `pos` (relative to the leg origin, world axes) in
    /// `time_ms`. Out-of-reach targets are clamped to the workspace
    /// boundary and logged; the stored target is the position actually
    /// commanded, so the position error stays bounded by the clamp.
    pub fn set_position(&mut self, pos: Vec3, time_ms: u32, frame: &BodyFrame) -> Result<()> {
        let local = frame.to_body(pos);
        let sol = self.solve(local);

        let applied = if sol.clamped {
            let degraded = EngineError::UnreachablePosition {
                leg: self.index,
                x: pos.x,
                y: pos.y,
                z: pos.z,
            };
            warn!("{}, clamped to the nearest reachable point", degraded);
            frame.to_world(self.forward(&sol))
        } else {
            pos
        };

        let sign = self.side.sign();
        let angles = [sol.coxa, sol.femur, sol.tibia];
        for (servo, angle) in self.servos.iter_mut().zip(angles) {
            servo.set_act_time(time_ms);
            servo.set_angle(angle * sign)?;
        }
        self.target = applied;
        Ok(())
    }

    /// Relocate the leg's reference origin without moving the foot: the
    /// equivalent foot position in the new frame is recomputed and
    /// re-targeted.
    pub fn set_origin(&mut self, new_origin: Vec3, time_ms: u32, frame: &BodyFrame) -> Result<()> {
        let retarget = self.origin + self.target - new_origin;
        self.origin = new_origin;
        self.set_position(retarget, time_ms, frame)
    }

    /// Rebase origin and target into a new frame without preserving the
    /// world foot position (the foot rides with the body).
    pub fn rebase(&mut self, old: &BodyFrame, new: &BodyFrame) {
        let target_body = old.to_body(self.target);
        self.origin = new.to_world(self.init_origin);
        self.target = new.to_world(target_body);
    }

    // --- Trajectory queue ---

    pub fn add_movement(&mut self, position: Vec3, delta_t_ms: u32) {
        self.trajectory.push(Movement {
            position,
            delta_t_ms,
        });
    }

    /// Clears the queue and cancels any pending interpolation
    pub fn reset_movement(&mut self) {
        self.trajectory.clear();
    }

    pub fn has_trajectory(&self) -> bool {
        !self.trajectory.is_empty()
    }

    /// Sum of waypoint time offsets (ms)
    pub fn trajectory_duration(&self) -> u32 {
        self.trajectory.iter().map(|m| m.delta_t_ms).sum()
    }

    /// Position the next waypoint would chain from
    pub fn queue_tail(&self) -> Vec3 {
        self.trajectory
            .last()
            .map(|m| m.position)
            .unwrap_or(self.target)
    }

    /// Sample the trajectory at `time_ms` since the queue started: walk
    /// waypoints summing their offsets and linearly interpolate between the
    /// bracketing pair. Clamped to the last waypoint past the end; the
    /// pre-queue position when the queue is empty.
    pub fn request_position(&self, time_ms: u32) -> Vec3 {
        let mut elapsed: u32 = 0;
        let mut prev = self.target;
        for m in &self.trajectory {
            let segment_start = elapsed;
            elapsed += m.delta_t_ms;
            if time_ms <= elapsed {
                if m.delta_t_ms == 0 {
                    return m.position;
                }
                let t = (time_ms - segment_start) as f32 / m.delta_t_ms as f32;
                return prev.lerp(m.position, t);
            }
            prev = m.position;
        }
        self.trajectory
            .last()
            .map(|m| m.position)
            .unwrap_or(self.target)
    }

    /// Queue a swing arc: lift by `height` along `up` while covering half
    /// the displacement, then set down at the full displacement. Waypoint
    /// offsets sum to exactly `total_t_ms`.
    pub fn step(&mut self, disp: Vec3, total_t_ms: u32, height: f32, up: Vec3) {
        let start = self.target;
        let half = total_t_ms / 2;
        self.reset_movement();
        self.add_movement(start + disp * 0.5 + up * height, half);
        self.add_movement(start + disp, total_t_ms - half);
    }

    /// Angular analogue of `step`: the foot arcs about the plane origin
    /// around `normal` by `angular` radians.
    pub fn turn(&mut self, angular: f32, total_t_ms: u32, height: f32, normal: Vec3) {
        let foot = self.foot();
        let mid = foot.rotated_about(normal, angular * 0.5) + normal * height;
        let end = foot.rotated_about(normal, angular);
        let half = total_t_ms / 2;
        self.reset_movement();
        self.add_movement(mid - self.origin, half);
        self.add_movement(end - self.origin, total_t_ms - half);
    }

    /// Send every servo to its calibrated midpoint: the safe default pose.
    /// Cancels any pending trajectory and re-anchors the foot target.
    pub fn mid_position(&mut self, time_ms: u32, frame: &BodyFrame) -> Result<()> {
        self.reset_movement();
        for servo in &mut self.servos {
            servo.set_act_time(time_ms);
            let mid = servo.mid_pulse();
            servo.set_pulse(mid)?;
        }
        self.target = frame.to_world(self.forward(&IkSolution {
            coxa: 0.0,
            femur: 0.0,
            tibia: 0.0,
            clamped: false,
        }));
        Ok(())
    }

    /// Calibrate all three servos in channel order, then re-anchor the
    /// foot target at the post-calibration midpoint pose.
    pub fn calibrate<T: Transport>(
        &mut self,
        link: &mut T,
        prompt: &mut dyn CalibrationPrompt,
        frame: &BodyFrame,
    ) -> Result<()> {
        for servo in &mut self.servos {
            servo.calibrate(link, prompt)?;
        }
        self.reset_movement();
        self.target = frame.to_world(self.forward(&IkSolution {
            coxa: 0.0,
            femur: 0.0,
            tibia: 0.0,
            clamped: false,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HexapodConfig, LegConfig};

    const TOL: f32 = 1e-2;

    fn test_leg() -> Leg {
        let cfg = HexapodConfig::default();
        Leg::from_config(0, &cfg.legs[0])
    }

    /// Straight-out planar leg: femur 50, tibia 50, no offsets
    fn planar_leg() -> Leg {
        let mut cfg: LegConfig = HexapodConfig::default().legs[0].clone();
        cfg.mount = Vec3::ZERO;
        cfg.mount_yaw = 0.0;
        cfg.side = Side::Right;
        cfg.geometry = LegGeometry {
            femur: 50.0,
            tibia: 50.0,
            coxa_offset: 0.0,
            z_offset: 0.0,
        };
        Leg::from_config(0, &cfg)
    }

    #[test]
    fn test_ik_round_trip_inside_workspace() {
        let leg = test_leg();
        let yaw = leg.mount_yaw;
        // Targets around the neutral stance, well inside the workspace
        let samples = [
            Vec3::new(70.0, 0.0, -60.0),
            Vec3::new(80.0, 10.0, -40.0),
            Vec3::new(60.0, -15.0, -70.0),
            Vec3::new(90.0, 5.0, -30.0),
        ];
        for s in samples {
            let local = s.rotated_z(yaw);
            let sol = leg.solve(local);
            assert!(!sol.clamped, "sample {:?} unexpectedly clamped", s);
            let back = leg.forward(&sol);
            assert!(
                back.approx_eq(local, TOL),
                "round trip failed: {:?} -> {:?}",
                local,
                back
            );
        }
    }

    #[test]
    fn test_reachability_limits() {
        let leg = planar_leg();

        // |50-50| = 0 <= 70 <= 100: reachable
        let sol = leg.solve(Vec3::new(70.0, 0.0, 0.0));
        assert!(!sol.clamped);
        assert!(leg.forward(&sol).approx_eq(Vec3::new(70.0, 0.0, 0.0), TOL));

        // 150 exceeds femur + tibia = 100: clamped onto the boundary
        let sol = leg.solve(Vec3::new(150.0, 0.0, 0.0));
        assert!(sol.clamped);
        let clamped = leg.forward(&sol);
        assert!((clamped.norm() - 100.0).abs() < TOL);
        assert!(clamped.approx_eq(Vec3::new(100.0, 0.0, 0.0), TOL));
    }

    #[test]
    fn test_trajectory_sampling_scenario() {
        let mut leg = planar_leg();
        leg.add_movement(Vec3::ZERO, 0);
        leg.add_movement(Vec3::new(10.0, 0.0, 0.0), 100);
        leg.add_movement(Vec3::new(10.0, 0.0, 10.0), 100);

        assert!(leg.request_position(0).approx_eq(Vec3::ZERO, TOL));
        assert!(leg
            .request_position(50)
            .approx_eq(Vec3::new(5.0, 0.0, 0.0), TOL));
        assert!(leg
            .request_position(150)
            .approx_eq(Vec3::new(10.0, 0.0, 5.0), TOL));
        // Past the total duration: clamped to the final waypoint
        assert!(leg
            .request_position(300)
            .approx_eq(Vec3::new(10.0, 0.0, 10.0), TOL));
    }

    #[test]
    fn test_trajectory_sampling_is_continuous() {
        let mut leg = planar_leg();
        leg.step(Vec3::new(20.0, 0.0, 0.0), 400, 10.0, Vec3::Z);

        let mut prev = leg.request_position(0);
        for t in (10..=500).step_by(10) {
            let pos = leg.request_position(t);
            // 10ms of a 400ms two-segment arc can only move so far
            assert!(
                (pos - prev).norm() < 5.0,
                "jump at t={}: {:?} -> {:?}",
                t,
                prev,
                pos
            );
            prev = pos;
        }
        assert!(leg
            .request_position(400)
            .approx_eq(leg.queue_tail(), TOL));
    }

    #[test]
    fn test_step_waypoints_sum_to_total_time() {
        let mut leg = planar_leg();
        leg.step(Vec3::new(20.0, 0.0, 0.0), 500, 10.0, Vec3::Z);
        assert_eq!(leg.trajectory_duration(), 500);

        leg.turn(0.2, 501, 10.0, Vec3::Z);
        assert_eq!(leg.trajectory_duration(), 501);
    }

    #[test]
    fn test_set_position_marks_servos_dirty() {
        let mut leg = test_leg();
        for servo in leg.servos_mut() {
            servo.mark_clean();
        }

        let target = leg.target() + Vec3::new(5.0, 0.0, 5.0);
        leg.set_position(target, 250, &BodyFrame::IDENTITY).unwrap();
        for servo in leg.servos() {
            assert_eq!(servo.act_time_ms(), 250);
        }
        assert!(leg.servos().iter().any(|s| s.is_dirty()));
        assert!(leg.target().approx_eq(target, TOL));
    }

    #[test]
    fn test_set_origin_preserves_foot_position() {
        let mut leg = test_leg();
        let foot_before = leg.foot();

        let new_origin = leg.origin() + Vec3::new(4.0, -3.0, 2.0);
        leg.set_origin(new_origin, 200, &BodyFrame::IDENTITY).unwrap();
        assert!(leg.foot().approx_eq(foot_before, TOL));
        assert_eq!(leg.origin(), new_origin);
    }
}
