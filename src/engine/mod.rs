// Kinematic engine for the hexapod
//
// Ownership is a strict tree: `Hexapod` owns one `Plane`, the plane owns
// six `Leg`s, each leg owns three `Servo`s. Frame state a leg needs from
// the plane is passed in per call; nothing holds a back-reference.

pub mod hexapod;
pub mod leg;
pub mod math;
pub mod plane;
pub mod servo;

pub use hexapod::Hexapod;
pub use leg::{Leg, Movement};
pub use math::Vec3;
pub use plane::Plane;
pub use servo::{CalibrationPrompt, JointKind, Servo};

use crate::bus::BusError;

/// Error types for the kinematic engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Target ({x:.1}, {y:.1}, {z:.1}) outside reachable workspace of leg {leg}")]
    UnreachablePosition { leg: usize, x: f32, y: f32, z: f32 },

    #[error("Servo on channel {channel} has no calibration bounds")]
    CalibrationIncomplete { channel: u8 },

    #[error(transparent)]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
