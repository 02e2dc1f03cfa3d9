// Single actuator model: pulse-width bounds, angle mapping, dirty tracking
//
// Angle and pulse width are never stored independently: every mutation goes
// through the same linear mapping and re-derives the angle from the clamped
// pulse, so the pair stays consistent.

use std::f32::consts::PI;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::{move_frame, protocol, wire_time, BusError, ServoTarget, Transport};

use super::{EngineError, Result};

/// Microseconds of pulse per radian of joint travel: the full electrical
/// span maps to 180 degrees.
const US_PER_RAD: f32 =
    (protocol::PULSE_CEIL_US - protocol::PULSE_FLOOR_US) as f32 / PI;

/// Sweep step during calibration
const CALIB_STEP_US: u16 = 25;

/// Move time for each calibration test pulse
const CALIB_STEP_TIME_MS: u32 = 200;

/// The three joints of a leg, in physical channel order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Coxa,
    Femur,
    Tibia,
}

/// Answers whether a joint under a calibration sweep has reached its
/// physical limit. The runtime wires this to an interactive prompt; tests
/// script it.
pub trait CalibrationPrompt {
    fn at_limit(&mut self, channel: u8, pulse_us: u16) -> bool;
}

pub struct Servo {
    channel: u8,
    joint: JointKind,
    min_pulse: u16,
    max_pulse: u16,
    pulse: u16,
    act_time_ms: u32,
    angle: f32,
    dirty: bool,
    calibrated: bool,
}

impl Servo {
    /// Servo with known calibration bounds (the startup path: bounds come
    /// from the configuration file).
    pub fn new(channel: u8, joint: JointKind, min_pulse: u16, max_pulse: u16) -> Self {
        let mid = min_pulse.midpoint(max_pulse);
        let mut servo = Self {
            channel,
            joint,
            min_pulse,
            max_pulse,
            pulse: mid,
            act_time_ms: 0,
            angle: 0.0,
            dirty: true,
            calibrated: true,
        };
        servo.angle = servo.angle_for_pulse(mid);
        servo
    }

    /// Servo whose bounds have not been established yet; every command is
    /// rejected until `calibrate` succeeds.
    pub fn uncalibrated(channel: u8, joint: JointKind) -> Self {
        Self {
            channel,
            joint,
            min_pulse: protocol::PULSE_FLOOR_US,
            max_pulse: protocol::PULSE_CEIL_US,
            pulse: protocol::PULSE_FLOOR_US.midpoint(protocol::PULSE_CEIL_US),
            act_time_ms: 0,
            angle: 0.0,
            dirty: false,
            calibrated: false,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn joint(&self) -> JointKind {
        self.joint
    }

    pub fn pulse(&self) -> u16 {
        self.pulse
    }

    pub fn min_pulse(&self) -> u16 {
        self.min_pulse
    }

    pub fn max_pulse(&self) -> u16 {
        self.max_pulse
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn act_time_ms(&self) -> u32 {
        self.act_time_ms
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn mid_pulse(&self) -> u16 {
        self.min_pulse.midpoint(self.max_pulse)
    }

    fn pulse_for_angle(&self, angle: f32) -> u16 {
        let mid = self.mid_pulse() as f32;
        (mid + angle * US_PER_RAD).round() as u16
    }

    fn angle_for_pulse(&self, pulse: u16) -> f32 {
        (pulse as f32 - self.mid_pulse() as f32) / US_PER_RAD
    }

    /// Command a joint angle (radians, zero at the calibrated midpoint).
    /// The implied pulse width is clamped into the calibrated bounds; an
    /// unchanged pulse is a no-op, not an error.
    pub fn set_angle(&mut self, angle: f32) -> Result<()> {
        let pulse = self.pulse_for_angle(angle);
        self.set_pulse(pulse)
    }

    /// Command a raw pulse width (microseconds), clamped into bounds.
    pub fn set_pulse(&mut self, pulse: u16) -> Result<()> {
        if !self.calibrated {
            return Err(EngineError::CalibrationIncomplete {
                channel: self.channel,
            });
        }

        let clamped = pulse.clamp(self.min_pulse, self.max_pulse);
        if clamped != self.pulse {
            self.pulse = clamped;
            self.dirty = true;
        }
        self.angle = self.angle_for_pulse(clamped);
        Ok(())
    }

    /// Desired time-to-reach for the next hardware command (ms)
    pub fn set_act_time(&mut self, time_ms: u32) {
        self.act_time_ms = time_ms;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn target(&self) -> ServoTarget {
        ServoTarget::new(self.channel, self.pulse)
    }

    /// Establish pulse-width bounds against the joint's physical limits:
    /// sweep from the electrical midpoint toward each end, one test pulse at
    /// a time, until the prompt reports the limit. Transport failures abort
    /// the sweep and leave the servo uncalibrated.
    pub fn calibrate<T: Transport>(
        &mut self,
        link: &mut T,
        prompt: &mut dyn CalibrationPrompt,
    ) -> Result<()> {
        let center = protocol::PULSE_FLOOR_US.midpoint(protocol::PULSE_CEIL_US);
        self.calibrated = false;

        self.write_test_pulse(link, center)?;
        let min_pulse = self.sweep(link, prompt, center, protocol::PULSE_FLOOR_US)?;

        self.write_test_pulse(link, center)?;
        let max_pulse = self.sweep(link, prompt, center, protocol::PULSE_CEIL_US)?;

        self.min_pulse = min_pulse;
        self.max_pulse = max_pulse;
        self.calibrated = true;
        self.pulse = self.mid_pulse();
        self.angle = 0.0;
        self.dirty = true;

        debug!(
            "Servo {} calibrated: [{}, {}]us",
            self.channel, self.min_pulse, self.max_pulse
        );
        Ok(())
    }

    fn sweep<T: Transport>(
        &mut self,
        link: &mut T,
        prompt: &mut dyn CalibrationPrompt,
        from: u16,
        toward: u16,
    ) -> Result<u16> {
        let mut pulse = from;
        loop {
            if prompt.at_limit(self.channel, pulse) || pulse == toward {
                return Ok(pulse);
            }
            pulse = if toward > pulse {
                (pulse + CALIB_STEP_US).min(toward)
            } else {
                pulse.saturating_sub(CALIB_STEP_US).max(toward)
            };
            self.write_test_pulse(link, pulse)?;
        }
    }

    /// Calibration is the slow interactive path, so a busy link is waited
    /// out here instead of being surfaced to the caller.
    fn write_test_pulse<T: Transport>(&self, link: &mut T, pulse: u16) -> Result<()> {
        let frame = move_frame(&[ServoTarget::new(self.channel, pulse)], CALIB_STEP_TIME_MS);
        let window = wire_time(frame.len(), protocol::DEFAULT_BAUDRATE)
            + Duration::from_millis(CALIB_STEP_TIME_MS as u64);
        loop {
            match link.write(&frame, window) {
                Ok(_) => return Ok(()),
                Err(BusError::Busy { remaining_ms }) => {
                    sleep(Duration::from_millis(remaining_ms.max(1)));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport that accepts every write immediately (no busy pacing)
    struct InstantLink {
        writes: usize,
    }

    impl Transport for InstantLink {
        fn write(&mut self, frame: &[u8], _busy_window: Duration) -> crate::bus::link::Result<usize> {
            self.writes += 1;
            Ok(frame.len())
        }

        fn read(&mut self, _buf: &mut [u8]) -> crate::bus::link::Result<usize> {
            Ok(0)
        }

        fn is_busy(&self) -> bool {
            false
        }
    }

    /// Reports the limit once the sweep passes a fixed pulse on each side
    struct ScriptedPrompt {
        low_stop: u16,
        high_stop: u16,
    }

    impl CalibrationPrompt for ScriptedPrompt {
        fn at_limit(&mut self, _channel: u8, pulse_us: u16) -> bool {
            pulse_us <= self.low_stop || pulse_us >= self.high_stop
        }
    }

    #[test]
    fn test_set_pulse_clamps_to_bounds() {
        let mut servo = Servo::new(0, JointKind::Coxa, 800, 2200);

        servo.set_pulse(100).unwrap();
        assert_eq!(servo.pulse(), 800);

        servo.set_pulse(3000).unwrap();
        assert_eq!(servo.pulse(), 2200);
    }

    #[test]
    fn test_set_angle_pulse_stays_in_bounds() {
        let mut servo = Servo::new(0, JointKind::Femur, 900, 2100);
        for angle in [-10.0, -1.5, -0.3, 0.0, 0.3, 1.5, 10.0] {
            servo.set_angle(angle).unwrap();
            assert!(servo.pulse() >= 900 && servo.pulse() <= 2100);
        }
    }

    #[test]
    fn test_angle_and_pulse_stay_consistent() {
        let mut servo = Servo::new(0, JointKind::Tibia, 500, 2500);
        servo.set_angle(0.5).unwrap();
        let expected = servo.angle_for_pulse(servo.pulse());
        assert!((servo.angle() - expected).abs() < 1e-6);

        // Clamped command: reported angle reflects the clamped pulse
        servo.set_angle(5.0).unwrap();
        assert_eq!(servo.pulse(), 2500);
        let expected = servo.angle_for_pulse(2500);
        assert!((servo.angle() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_unchanged_pulse_does_not_mark_dirty() {
        let mut servo = Servo::new(0, JointKind::Coxa, 800, 2200);
        servo.mark_clean();

        let current = servo.pulse();
        servo.set_pulse(current).unwrap();
        assert!(!servo.is_dirty());

        servo.set_pulse(current + 10).unwrap();
        assert!(servo.is_dirty());
    }

    #[test]
    fn test_uncalibrated_servo_rejects_commands() {
        let mut servo = Servo::uncalibrated(4, JointKind::Femur);
        assert!(matches!(
            servo.set_angle(0.1),
            Err(EngineError::CalibrationIncomplete { channel: 4 })
        ));
        assert!(matches!(
            servo.set_pulse(1500),
            Err(EngineError::CalibrationIncomplete { channel: 4 })
        ));
    }

    #[test]
    fn test_calibration_establishes_ordered_bounds() {
        let mut servo = Servo::uncalibrated(2, JointKind::Coxa);
        let mut link = InstantLink { writes: 0 };
        let mut prompt = ScriptedPrompt {
            low_stop: 850,
            high_stop: 2150,
        };

        servo.calibrate(&mut link, &mut prompt).unwrap();
        assert!(link.writes > 0);
        assert!(servo.is_calibrated());
        assert!(servo.min_pulse <= servo.max_pulse);
        assert!(servo.min_pulse <= 850 && servo.max_pulse >= 2150);

        // Post-calibration scenario: commands below min clamp to exactly min
        let min = servo.min_pulse;
        servo.set_pulse(min - 100).unwrap();
        assert_eq!(servo.pulse(), min);
    }
}
