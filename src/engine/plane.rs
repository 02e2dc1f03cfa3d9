// Body frame and synchronized multi-leg motion
//
// The plane is the robot's own coordinate system: an origin in world space
// plus orthonormal `normal` (up) and `front` axes. All leg positions are
// expressed relative to this frame. The rotate family splits by intent:
// the compensating rotations re-target every leg so the feet stay put in
// the world (the body rotates "under" stationary feet), while `tilt_to`
// carries the legs along with the body and touches no servo.

use tracing::warn;

use crate::bus::{self, move_frame, protocol, wire_time, Transport};
use crate::config::HexapodConfig;

use super::leg::Leg;
use super::math::{BodyFrame, Vec3};
use super::servo::CalibrationPrompt;
use super::Result;

pub struct Plane {
    origin: Vec3,
    normal: Vec3,
    front: Vec3,
    linear_vel: Vec3,
    angular_vel: f32,
    legs: [Leg; 6],
}

impl Plane {
    pub fn from_config(config: &HexapodConfig) -> Self {
        let legs = std::array::from_fn(|i| Leg::from_config(i, &config.legs[i]));
        Self {
            origin: Vec3::ZERO,
            normal: Vec3::Z,
            front: Vec3::new(1.0, 0.0, 0.0),
            linear_vel: Vec3::ZERO,
            angular_vel: 0.0,
            legs,
        }
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn front(&self) -> Vec3 {
        self.front
    }

    pub fn legs(&self) -> &[Leg; 6] {
        &self.legs
    }

    pub fn leg_mut(&mut self, index: usize) -> &mut Leg {
        &mut self.legs[index]
    }

    /// Commanded body velocity bookkeeping (mm/ms linear, rad/ms angular)
    pub fn set_velocity(&mut self, linear: Vec3, angular: f32) {
        self.linear_vel = linear;
        self.angular_vel = angular;
    }

    pub fn velocity(&self) -> (Vec3, f32) {
        (self.linear_vel, self.angular_vel)
    }

    pub fn frame(&self) -> BodyFrame {
        BodyFrame {
            front: self.front,
            left: self.normal.cross(self.front),
            normal: self.normal,
        }
    }

    /// Project a world-space point onto the body plane
    pub fn projection(&self, point: Vec3) -> Vec3 {
        point - self.normal * (point - self.origin).dot(self.normal)
    }

    /// Transform a world-frame vector into body coordinates
    pub fn tf_vector(&self, world: Vec3) -> Vec3 {
        self.frame().to_body(world)
    }

    /// Normalize and store a new orientation pair. The front axis is
    /// re-orthogonalized against the normal; a degenerate pair keeps the
    /// previous front.
    fn set_frame(&mut self, normal: Vec3, front: Vec3) -> BodyFrame {
        let n = normal.normalized();
        let mut f = (front - n * front.dot(n)).normalized();
        if f.norm() < 0.5 {
            warn!("Degenerate front axis, keeping previous");
            f = (self.front - n * self.front.dot(n)).normalized();
        }
        self.normal = n;
        self.front = f;
        self.frame()
    }

    /// Rotate the body to a new orientation while every foot keeps its
    /// world position: leg origins follow the frame, targets compensate.
    pub fn rotate_to(&mut self, new_normal: Vec3, new_front: Vec3, time_ms: u32) {
        let frame = self.set_frame(new_normal, new_front);
        for leg in &mut self.legs {
            let new_origin = frame.to_world(leg.init_origin());
            if let Err(e) = leg.set_origin(new_origin, time_ms, &frame) {
                warn!("Leg {}: rotation compensation dropped: {}", leg.index(), e);
            }
        }
    }

    /// Euler form of `rotate_to`: roll about front, pitch about left, yaw
    /// about normal, applied to the current axes in that order.
    pub fn rotate_euler(&mut self, roll: f32, pitch: f32, yaw: f32, time_ms: u32) {
        let f = self.frame();
        let mut normal = self.normal;
        let mut front = self.front;
        for (axis, angle) in [(f.front, roll), (f.left, pitch), (f.normal, yaw)] {
            normal = normal.rotated_about(axis, angle);
            front = front.rotated_about(axis, angle);
        }
        self.rotate_to(normal, front, time_ms);
    }

    pub fn rotate_norm(&mut self, new_normal: Vec3, time_ms: u32) {
        self.rotate_to(new_normal, self.front, time_ms);
    }

    pub fn rotate_front(&mut self, new_front: Vec3, time_ms: u32) {
        let f = new_front.normalized();
        let n = (self.normal - f * self.normal.dot(f)).normalized();
        self.rotate_to(n, f, time_ms);
    }

    /// Body-only tilt: the frame changes and the legs ride along with it;
    /// joint angles are untouched, so nothing is sent to the servos.
    pub fn tilt_to(&mut self, new_normal: Vec3, new_front: Vec3) {
        let old = self.frame();
        let new = self.set_frame(new_normal, new_front);
        for leg in &mut self.legs {
            leg.rebase(&old, &new);
        }
    }

    /// Shift the body origin; feet compensate to keep their world position
    pub fn translate(&mut self, new_origin: Vec3, time_ms: u32) {
        let delta = new_origin - self.origin;
        self.origin = new_origin;
        let frame = self.frame();
        for leg in &mut self.legs {
            let retarget = leg.target() - delta;
            if let Err(e) = leg.set_position(retarget, time_ms, &frame) {
                warn!("Leg {}: translation compensation dropped: {}", leg.index(), e);
            }
        }
    }

    /// Queue a swing arc on each leg of the group. Every leg receives
    /// waypoints summing to exactly `step_t_ms`, so the group finishes its
    /// phase in lock-step. `unit_disp` is in body coordinates.
    pub fn step_group(&mut self, unit_disp: Vec3, step_t_ms: u32, group: &[usize], height: f32) {
        let frame = self.frame();
        let disp = frame.to_world(unit_disp);
        for &i in group {
            self.legs[i].step(disp, step_t_ms, height, frame.normal);
        }
    }

    /// Angular analogue of `step_group`: feet arc about the body's normal
    pub fn turn_group(&mut self, unit_angular: f32, step_t_ms: u32, group: &[usize], height: f32) {
        let frame = self.frame();
        for &i in group {
            self.legs[i].turn(unit_angular, step_t_ms, height, frame.normal);
        }
    }

    /// Append a relative displacement waypoint to each leg of the group
    pub fn add_rel_movement_group(&mut self, disp: Vec3, delta_t_ms: u32, group: &[usize]) {
        let frame = self.frame();
        let disp = frame.to_world(disp);
        for &i in group {
            let position = self.legs[i].queue_tail() + disp;
            self.legs[i].add_movement(position, delta_t_ms);
        }
    }

    pub fn reset_movement_group(&mut self, group: &[usize]) {
        for &i in group {
            self.legs[i].reset_movement();
        }
    }

    pub fn reset_all_movement(&mut self) {
        for leg in &mut self.legs {
            leg.reset_movement();
        }
    }

    /// Longest queued trajectory across all legs (ms)
    pub fn max_trajectory_duration(&self) -> u32 {
        self.legs
            .iter()
            .map(|l| l.trajectory_duration())
            .max()
            .unwrap_or(0)
    }

    pub fn has_trajectory(&self) -> bool {
        self.legs.iter().any(|l| l.has_trajectory())
    }

    /// One sampling pass of the periodic control tick: every leg with a
    /// queued trajectory is re-targeted to its interpolated position.
    /// Per-leg failures are absorbed here; they never abort the tick.
    pub fn sample_trajectories(&mut self, elapsed_ms: u32, tick_ms: u32) {
        let frame = self.frame();
        for leg in &mut self.legs {
            if !leg.has_trajectory() {
                continue;
            }
            let pos = leg.request_position(elapsed_ms);
            if let Err(e) = leg.set_position(pos, tick_ms, &frame) {
                warn!("Leg {}: trajectory sample dropped: {}", leg.index(), e);
            }
        }
    }

    /// Serialize every dirty servo into one batched move frame and send it.
    /// Servos keep their physical channel order (leg index, then coxa,
    /// femur, tibia). Dirty flags are cleared only after a successful
    /// write, so a busy or failed link retries the same state next tick.
    pub fn flush_dirty<T: Transport>(&mut self, link: &mut T) -> bus::link::Result<usize> {
        let mut targets = Vec::new();
        let mut act_time: u32 = 0;
        for leg in &self.legs {
            for servo in leg.servos() {
                if servo.is_dirty() {
                    targets.push(servo.target());
                    act_time = act_time.max(servo.act_time_ms());
                }
            }
        }
        if targets.is_empty() {
            return Ok(0);
        }

        let frame = move_frame(&targets, act_time);
        let window = wire_time(frame.len(), protocol::DEFAULT_BAUDRATE);
        link.write(&frame, window)?;

        for leg in &mut self.legs {
            for servo in leg.servos_mut() {
                servo.mark_clean();
            }
        }
        Ok(targets.len())
    }

    /// Calibrate every servo, leg by leg. Strictly sequential: the link is
    /// a single half-duplex channel.
    pub fn calibrate<T: Transport>(
        &mut self,
        link: &mut T,
        prompt: &mut dyn CalibrationPrompt,
    ) -> Result<()> {
        let frame = self.frame();
        for leg in &mut self.legs {
            leg.calibrate(link, prompt, &frame)?;
        }
        Ok(())
    }

    /// Safe default pose: every servo at its calibrated midpoint
    pub fn mid_position(&mut self, time_ms: u32) {
        let frame = self.frame();
        for leg in &mut self.legs {
            if let Err(e) = leg.mid_position(time_ms, &frame) {
                warn!("Leg {}: mid position dropped: {}", leg.index(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use std::time::Duration;

    const TOL: f32 = 1e-2;

    struct CaptureLink {
        frames: Vec<Vec<u8>>,
        busy: bool,
    }

    impl CaptureLink {
        fn new() -> Self {
            Self {
                frames: Vec::new(),
                busy: false,
            }
        }
    }

    impl Transport for CaptureLink {
        fn write(&mut self, frame: &[u8], _busy_window: Duration) -> bus::link::Result<usize> {
            if self.busy {
                return Err(BusError::Busy { remaining_ms: 5 });
            }
            self.frames.push(frame.to_vec());
            Ok(frame.len())
        }

        fn read(&mut self, _buf: &mut [u8]) -> bus::link::Result<usize> {
            Ok(0)
        }

        fn is_busy(&self) -> bool {
            self.busy
        }
    }

    fn test_plane() -> Plane {
        Plane::from_config(&HexapodConfig::default())
    }

    fn assert_frame_consistent(plane: &Plane) {
        assert!((plane.normal().norm() - 1.0).abs() < 1e-4);
        assert!((plane.front().norm() - 1.0).abs() < 1e-4);
        assert!(plane.normal().dot(plane.front()).abs() < 1e-4);
    }

    #[test]
    fn test_rotations_keep_frame_orthonormal() {
        let mut plane = test_plane();
        plane.rotate_euler(0.1, -0.05, 0.2, 100);
        assert_frame_consistent(&plane);

        // Sloppy inputs: non-unit, non-orthogonal
        plane.rotate_to(Vec3::new(0.1, 0.2, 2.0), Vec3::new(3.0, 0.1, 0.4), 100);
        assert_frame_consistent(&plane);

        plane.rotate_norm(Vec3::new(0.05, 0.0, 1.0), 100);
        assert_frame_consistent(&plane);

        plane.rotate_front(Vec3::new(0.9, 0.2, 0.0), 100);
        assert_frame_consistent(&plane);
    }

    #[test]
    fn test_compensating_rotation_preserves_feet() {
        let mut plane = test_plane();
        let feet: Vec<Vec3> = plane.legs().iter().map(|l| l.foot()).collect();

        plane.rotate_norm(Vec3::new(0.05, 0.02, 1.0), 200);

        for (leg, before) in plane.legs().iter().zip(&feet) {
            assert!(
                leg.foot().approx_eq(*before, 0.5),
                "leg {} foot moved: {:?} -> {:?}",
                leg.index(),
                before,
                leg.foot()
            );
        }
    }

    #[test]
    fn test_translate_preserves_world_feet() {
        let mut plane = test_plane();
        let world_feet: Vec<Vec3> = plane.legs().iter().map(|l| plane.origin() + l.foot()).collect();

        plane.translate(plane.origin() + Vec3::new(0.0, 0.0, -10.0), 200);

        for (leg, before) in plane.legs().iter().zip(&world_feet) {
            let now = plane.origin() + leg.foot();
            assert!(now.approx_eq(*before, 0.5));
        }
    }

    #[test]
    fn test_tilt_keeps_body_local_targets() {
        let mut plane = test_plane();
        let frame = plane.frame();
        let local: Vec<Vec3> = plane
            .legs()
            .iter()
            .map(|l| frame.to_body(l.target()))
            .collect();

        plane.tilt_to(Vec3::new(0.1, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.1));
        assert_frame_consistent(&plane);

        let frame = plane.frame();
        for (leg, before) in plane.legs().iter().zip(&local) {
            assert!(frame.to_body(leg.target()).approx_eq(*before, TOL));
        }
        // No servo was touched
        let mut link = CaptureLink::new();
        // Construction leaves servos dirty; clear them first for the check
        let mut plane2 = test_plane();
        plane2.flush_dirty(&mut link).unwrap();
        plane2.tilt_to(Vec3::new(0.1, 0.0, 1.0), Vec3::new(1.0, 0.0, 0.1));
        assert_eq!(plane2.flush_dirty(&mut link).unwrap(), 0);
    }

    #[test]
    fn test_step_group_durations_match() {
        let mut plane = test_plane();
        let group = [0usize, 2, 4];
        plane.step_group(Vec3::new(20.0, 0.0, 0.0), 500, &group, 10.0);

        for &i in &group {
            assert_eq!(plane.legs()[i].trajectory_duration(), 500);
        }
        for i in [1usize, 3, 5] {
            assert!(!plane.legs()[i].has_trajectory());
        }

        plane.turn_group(0.15, 333, &[1, 3, 5], 10.0);
        for i in [1usize, 3, 5] {
            assert_eq!(plane.legs()[i].trajectory_duration(), 333);
        }
    }

    #[test]
    fn test_flush_batches_in_channel_order() {
        let mut plane = test_plane();
        let mut link = CaptureLink::new();

        let count = plane.flush_dirty(&mut link).unwrap();
        assert_eq!(count, 18);
        assert_eq!(link.frames.len(), 1);

        // Channels appear in ascending physical order
        let text = String::from_utf8(link.frames[0].clone()).unwrap();
        let channels: Vec<u32> = text
            .trim_end()
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .trim_end_matches('T')
            .split('#')
            .filter(|s| !s.is_empty())
            .map(|s| s.split('P').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(channels, (0..18).collect::<Vec<u32>>());

        // Nothing dirty afterwards
        assert_eq!(plane.flush_dirty(&mut link).unwrap(), 0);
        assert_eq!(link.frames.len(), 1);
    }

    #[test]
    fn test_flush_keeps_dirty_on_busy_link() {
        let mut plane = test_plane();
        let mut link = CaptureLink::new();
        link.busy = true;

        assert!(matches!(
            plane.flush_dirty(&mut link),
            Err(BusError::Busy { .. })
        ));

        link.busy = false;
        assert_eq!(plane.flush_dirty(&mut link).unwrap(), 18);
    }
}
