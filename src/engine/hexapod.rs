// Top-level orchestration: command surface over one plane and one link
//
// Scheduling is single-threaded and loop-driven. Gait primitives enqueue
// leg trajectories, then a paced tick loop samples them and flushes dirty
// servos; `sync_servo_with_delay` is the only intentional blocking point
// (the hardware gives no completion feedback, so pacing is by time). A
// busy link defers the flush to the next tick; real transport failures
// abort the running command but leave the kinematic state intact.

use std::f32::consts::TAU;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bus::{BusError, Transport};
use crate::config::{HexapodConfig, DEFAULT_STEP_HEIGHT_MM, TICK_MS};

use super::math::Vec3;
use super::plane::Plane;
use super::servo::CalibrationPrompt;
use super::Result;

/// Tripod gait: two alternating triads of legs
pub const TRIPOD_A: [usize; 3] = [0, 2, 4];
pub const TRIPOD_B: [usize; 3] = [1, 3, 5];

/// Segments of the look-around sweep
const SWEEP_SEGMENTS: u32 = 12;

pub struct Hexapod<T: Transport> {
    link: T,
    plane: Plane,
    power_cycles: u32,
    session_start: Instant,
    last_command: Instant,
    phase_start: Option<Instant>,
}

impl<T: Transport> Hexapod<T> {
    pub fn new(link: T, config: &HexapodConfig) -> Self {
        let now = Instant::now();
        Self {
            link,
            plane: Plane::from_config(config),
            power_cycles: 0,
            session_start: now,
            last_command: now,
            phase_start: None,
        }
    }

    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    pub fn plane_mut(&mut self) -> &mut Plane {
        &mut self.plane
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    /// Record that a command arrived (session bookkeeping)
    pub fn note_command(&mut self) {
        self.last_command = Instant::now();
    }

    pub fn idle_time(&self) -> Duration {
        self.last_command.elapsed()
    }

    /// Elapsed session time since construction
    pub fn total_use_time(&self) -> Duration {
        self.session_start.elapsed()
    }

    /// Cumulative successful calibration/power-up sequences
    pub fn power_cycle(&self) -> u32 {
        self.power_cycles
    }

    /// Start replaying whatever trajectories are queued
    pub fn start_trajectories(&mut self) {
        if self.plane.has_trajectory() {
            self.phase_start = Some(Instant::now());
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase_start.is_none() && !self.plane.has_trajectory()
    }

    /// One control tick: sample active trajectories, then flush dirty
    /// servos. A busy link is not an error; the flush retries next tick.
    pub fn tick(&mut self) -> Result<()> {
        if let Some(t0) = self.phase_start {
            let elapsed = t0.elapsed().as_millis() as u32;
            self.plane.sample_trajectories(elapsed, TICK_MS);
            if elapsed >= self.plane.max_trajectory_duration() {
                self.plane.reset_all_movement();
                self.phase_start = None;
            }
        }

        match self.plane.flush_dirty(&mut self.link) {
            Ok(_) => Ok(()),
            Err(BusError::Busy { remaining_ms }) => {
                debug!("Link busy for {}ms, deferring flush", remaining_ms);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Block for `delay_ms`, ticking at the control rate so queued
    /// trajectories keep replaying while the servos catch up.
    pub fn sync_servo_with_delay(&mut self, delay_ms: u32) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(delay_ms as u64);
        loop {
            self.tick()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            sleep((deadline - now).min(Duration::from_millis(TICK_MS as u64)));
        }
    }

    /// Replay the queued phase to completion. One extra tick period past
    /// the nominal duration guarantees the final waypoints are sampled.
    fn run_phase(&mut self, total_t_ms: u32) -> Result<()> {
        self.start_trajectories();
        self.sync_servo_with_delay(total_t_ms + TICK_MS)
    }

    /// Tripod-gait linear walk: per half-step one triad swings through a
    /// lifted arc by `unit_disp` (body frame) while the other pushes flat
    /// by the opposite displacement, then the triads swap.
    pub fn move_linear(&mut self, unit_disp: Vec3, step_t_ms: u32, count: u32) -> Result<()> {
        info!(
            "Walk: disp ({:.1}, {:.1}, {:.1})mm, {}ms/step x{}",
            unit_disp.x, unit_disp.y, unit_disp.z, step_t_ms, count
        );
        self.plane
            .set_velocity(unit_disp * (1.0 / step_t_ms as f32), 0.0);

        for _ in 0..count {
            for (swing, stance) in [(TRIPOD_A, TRIPOD_B), (TRIPOD_B, TRIPOD_A)] {
                self.plane
                    .step_group(unit_disp, step_t_ms, &swing, DEFAULT_STEP_HEIGHT_MM);
                self.plane.step_group(-unit_disp, step_t_ms, &stance, 0.0);
                self.run_phase(step_t_ms)?;
            }
        }

        self.plane.set_velocity(Vec3::ZERO, 0.0);
        Ok(())
    }

    /// Tripod-gait in-place turn by `unit_angular` radians per half-step
    pub fn move_angular(&mut self, unit_angular: f32, step_t_ms: u32, count: u32) -> Result<()> {
        info!(
            "Turn: {:.3}rad, {}ms/step x{}",
            unit_angular, step_t_ms, count
        );
        self.plane
            .set_velocity(Vec3::ZERO, unit_angular / step_t_ms as f32);

        for _ in 0..count {
            for (swing, stance) in [(TRIPOD_A, TRIPOD_B), (TRIPOD_B, TRIPOD_A)] {
                self.plane
                    .turn_group(unit_angular, step_t_ms, &swing, DEFAULT_STEP_HEIGHT_MM);
                self.plane.turn_group(-unit_angular, step_t_ms, &stance, 0.0);
                self.run_phase(step_t_ms)?;
            }
        }

        self.plane.set_velocity(Vec3::ZERO, 0.0);
        Ok(())
    }

    /// Look-around: tilt the body's up axis to `rot_start_norm`, sweep it
    /// once around the original up axis over `total_t_ms`, then level out.
    /// Feet keep ground contact throughout (compensating rotations).
    pub fn rotate_body_around(&mut self, rot_start_norm: Vec3, total_t_ms: u32) -> Result<()> {
        let base = self.plane.normal();
        let front = self.plane.front();
        let start = rot_start_norm.normalized();
        let seg_t = (total_t_ms / (SWEEP_SEGMENTS + 2)).max(TICK_MS);

        self.plane.rotate_to(start, front, seg_t);
        self.sync_servo_with_delay(seg_t)?;

        for k in 1..=SWEEP_SEGMENTS {
            let angle = k as f32 / SWEEP_SEGMENTS as f32 * TAU;
            let normal = start.rotated_about(base, angle);
            self.plane.rotate_to(normal, front, seg_t);
            self.sync_servo_with_delay(seg_t)?;
        }

        self.plane.rotate_to(base, front, seg_t);
        self.sync_servo_with_delay(seg_t)
    }

    /// Calibrate every servo, then count the power-up
    pub fn calibrate(&mut self, prompt: &mut dyn CalibrationPrompt) -> Result<()> {
        self.plane.calibrate(&mut self.link, prompt)?;
        self.power_cycles += 1;
        info!("Calibration complete, power cycle {}", self.power_cycles);
        Ok(())
    }

    /// Fixed choreography: crouch, sway side to side, nod, rise, sit
    pub fn sit_dance(&mut self) -> Result<()> {
        info!("Sit dance");
        let up = self.plane.normal();
        let start = self.plane.origin();

        self.plane.translate(start - up * 20.0, 600);
        self.sync_servo_with_delay(600)?;

        for roll in [0.15, -0.3, 0.15] {
            self.plane.rotate_euler(roll, 0.0, 0.0, 400);
            self.sync_servo_with_delay(400)?;
        }
        for pitch in [0.12, -0.12] {
            self.plane.rotate_euler(0.0, pitch, 0.0, 400);
            self.sync_servo_with_delay(400)?;
        }

        self.plane.translate(start, 600);
        self.sync_servo_with_delay(600)?;

        // Settle into the sit
        self.plane.translate(start - up * 35.0, 800);
        self.sync_servo_with_delay(800)
    }

    /// Safe default pose: every servo to its calibrated midpoint
    pub fn all_servo_mid_position(&mut self) -> Result<()> {
        self.plane.mid_position(1000);
        self.phase_start = None;
        self.sync_servo_with_delay(1000)
    }
}
