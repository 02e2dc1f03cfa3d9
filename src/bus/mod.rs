// Servo bus module for the USC-32 servo controller
//
// Provides:
// - ASCII move-frame encoding for the controller's serial protocol
// - A `Transport` abstraction over the half-duplex serial link, with
//   busy-window pacing (the controller has no completion feedback)

pub mod link;
pub mod protocol;

pub use link::{BusError, DryRunLink, SerialLink, Transport};
pub use protocol::{move_frame, wire_time, ServoTarget};
