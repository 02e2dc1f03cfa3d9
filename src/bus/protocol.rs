// USC-32 servo controller ASCII protocol
//
// A single move frame can address any number of the 32 channels and carries
// one shared move time:
//
//   #<ch>P<pulse>#<ch>P<pulse>...T<time>\r\n
//
// Pulse widths are in microseconds, the move time in milliseconds. The
// controller interpolates each addressed servo from its current pulse width
// to the target over the move time.

use std::time::Duration;

/// Default serial configuration for the USC-32 board
pub const DEFAULT_BAUDRATE: u32 = 9_600;

/// Channels on the controller
pub const CHANNEL_COUNT: u8 = 32;

/// Hard electrical pulse range accepted by the board (microseconds)
pub const PULSE_FLOOR_US: u16 = 500;
pub const PULSE_CEIL_US: u16 = 2500;

/// One servo's share of a move frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoTarget {
    pub channel: u8,
    pub pulse_us: u16,
}

impl ServoTarget {
    pub fn new(channel: u8, pulse_us: u16) -> Self {
        Self { channel, pulse_us }
    }
}

/// Encode a batched move frame.
///
/// Targets are emitted in the order given; callers are expected to pass them
/// in physical channel order so the controller latches them predictably.
/// Returns an empty buffer for an empty target list (nothing to send).
pub fn move_frame(targets: &[ServoTarget], time_ms: u32) -> Vec<u8> {
    if targets.is_empty() {
        return Vec::new();
    }

    let mut frame = String::with_capacity(targets.len() * 10 + 8);
    for t in targets {
        frame.push('#');
        frame.push_str(&t.channel.to_string());
        frame.push('P');
        frame.push_str(&t.pulse_us.to_string());
    }
    frame.push('T');
    frame.push_str(&time_ms.to_string());
    frame.push_str("\r\n");

    frame.into_bytes()
}

/// Time the frame occupies the wire at the given baudrate (8N1: 10 bits
/// per byte), rounded up to a whole millisecond.
pub fn wire_time(frame_len: usize, baudrate: u32) -> Duration {
    let bits = frame_len as u64 * 10;
    let ms = (bits * 1000).div_ceil(baudrate as u64);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_target_frame() {
        let frame = move_frame(&[ServoTarget::new(3, 1500)], 500);
        assert_eq!(frame, b"#3P1500T500\r\n");
    }

    #[test]
    fn test_batched_frame_preserves_order() {
        let targets = [
            ServoTarget::new(0, 1500),
            ServoTarget::new(1, 800),
            ServoTarget::new(17, 2200),
        ];
        let frame = move_frame(&targets, 120);
        assert_eq!(frame, b"#0P1500#1P800#17P2200T120\r\n");
    }

    #[test]
    fn test_empty_frame() {
        assert!(move_frame(&[], 500).is_empty());
    }

    #[test]
    fn test_wire_time_at_9600() {
        // 13 bytes * 10 bits = 130 bits; 130 / 9600 s = 13.54ms -> 14ms
        assert_eq!(wire_time(13, 9600), Duration::from_millis(14));
        assert_eq!(wire_time(0, 9600), Duration::from_millis(0));
    }
}
