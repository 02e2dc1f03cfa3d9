// Loop timing, topics, serial defaults, and robot geometry/calibration
use std::f32::consts::FRAC_PI_4;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::leg::{LegGeometry, Side};
use crate::engine::math::Vec3;
use crate::engine::servo::JointKind;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Control tick used when sampling trajectories (ms)
pub const TICK_MS: u32 = 20;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(500);

// Zenoh topics
pub const TOPIC_CMD_BODY: &str = "hexapod/cmd/body"; // commands
pub const TOPIC_STATE: &str = "hexapod/state/report"; // session report
pub const TOPIC_HEALTH: &str = "hexapod/state/health"; // health status

// Serial port for the USC-32 servo controller
pub const SERVO_PORT: &str = "/dev/ttyAMA0";

// Default gait parameters
pub const DEFAULT_STEP_HEIGHT_MM: f32 = 10.0;
pub const DEFAULT_STEP_TIME_MS: u32 = 500;

/// Calibration bounds for one servo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoConfig {
    pub channel: u8,
    pub joint: JointKind,
    pub min_pulse: u16,
    pub max_pulse: u16,
}

/// Geometry and servo layout of one leg
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegConfig {
    pub side: Side,
    /// Mount point in the body frame (mm, relative to body center)
    pub mount: Vec3,
    /// Neutral azimuth of the leg in the body frame (rad)
    pub mount_yaw: f32,
    pub geometry: LegGeometry,
    pub servos: [ServoConfig; 3],
}

/// Full robot description, loaded once at startup and immutable after
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HexapodConfig {
    pub legs: [LegConfig; 6],
}

impl HexapodConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl Default for HexapodConfig {
    /// Standard hexagonal layout: legs 0..2 on the right from front to
    /// back, legs 3..5 on the left from back to front. Channel n*3+j for
    /// leg n, joint j (coxa, femur, tibia).
    fn default() -> Self {
        let legs = std::array::from_fn(|i| {
            let i = i as u8;
            // Body frame: +x forward, +y left. Right side: -45 (front),
            // -90 (mid), -135deg (rear); mirrored on the left.
            let yaw = if i < 3 {
                -(i as f32 + 1.0) * FRAC_PI_4
            } else {
                (6.0 - i as f32) * FRAC_PI_4
            };
            let side = if i < 3 { Side::Right } else { Side::Left };
            LegConfig {
                side,
                mount: Vec3::new(60.0 * yaw.cos(), 60.0 * yaw.sin(), 0.0),
                mount_yaw: yaw,
                geometry: LegGeometry::default(),
                servos: std::array::from_fn(|j| ServoConfig {
                    channel: i * 3 + j as u8,
                    joint: [JointKind::Coxa, JointKind::Femur, JointKind::Tibia][j],
                    min_pulse: 800,
                    max_pulse: 2200,
                }),
            }
        });
        Self { legs }
    }
}
