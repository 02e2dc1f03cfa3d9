// Half-duplex serial link with busy-window pacing
//
// The USC-32 gives no completion feedback, so the link tracks a
// "next allowed write" instant instead: every write declares how long the
// channel will be occupied, and later writes inside that window are refused
// with `BusError::Busy` for the caller to retry on its next tick.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::debug;

use super::protocol::DEFAULT_BAUDRATE;

/// Read/response timeout on the port
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Settle margin added to every declared busy window
const SETTLE_MARGIN: Duration = Duration::from_millis(10);

/// Error types for servo bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link busy for another {remaining_ms}ms")]
    Busy { remaining_ms: u64 },
}

pub type Result<T> = std::result::Result<T, BusError>;

/// Byte-level access to the servo controller.
///
/// Implementations must refuse writes while a prior write's busy window has
/// not elapsed; callers treat `Busy` as retry-on-next-tick, never fatal.
pub trait Transport {
    fn write(&mut self, frame: &[u8], busy_window: Duration) -> Result<usize>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn is_busy(&self) -> bool;
}

/// Real serial link to the controller
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    ready_at: Instant,
}

impl SerialLink {
    /// Open a new connection to the servo controller
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            port,
            ready_at: Instant::now(),
        })
    }
}

impl Transport for SerialLink {
    fn write(&mut self, frame: &[u8], busy_window: Duration) -> Result<usize> {
        let now = Instant::now();
        if now < self.ready_at {
            return Err(BusError::Busy {
                remaining_ms: (self.ready_at - now).as_millis() as u64,
            });
        }

        self.port.write_all(frame)?;
        self.port.flush()?;
        self.ready_at = now + busy_window + SETTLE_MARGIN;
        Ok(frame.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.port.read(buf)?)
    }

    fn is_busy(&self) -> bool {
        Instant::now() < self.ready_at
    }
}

/// Link stand-in for running without hardware: frames are logged and
/// dropped, but busy pacing behaves like the real port so timing paths
/// stay honest.
pub struct DryRunLink {
    ready_at: Instant,
    frames_written: u64,
}

impl DryRunLink {
    pub fn new() -> Self {
        Self {
            ready_at: Instant::now(),
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Default for DryRunLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DryRunLink {
    fn write(&mut self, frame: &[u8], busy_window: Duration) -> Result<usize> {
        let now = Instant::now();
        if now < self.ready_at {
            return Err(BusError::Busy {
                remaining_ms: (self.ready_at - now).as_millis() as u64,
            });
        }

        debug!("dry-run frame: {}", String::from_utf8_lossy(frame).trim_end());
        self.frames_written += 1;
        self.ready_at = now + busy_window;
        Ok(frame.len())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn is_busy(&self) -> bool {
        Instant::now() < self.ready_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_busy_window() {
        let mut link = DryRunLink::new();
        assert!(!link.is_busy());

        link.write(b"#0P1500T100\r\n", Duration::from_millis(50)).unwrap();
        assert!(link.is_busy());

        match link.write(b"#0P1600T100\r\n", Duration::from_millis(50)) {
            Err(BusError::Busy { .. }) => {}
            other => panic!("expected Busy, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_dry_run_zero_window_stays_ready() {
        let mut link = DryRunLink::new();
        link.write(b"#0P1500T0\r\n", Duration::ZERO).unwrap();
        link.write(b"#0P1600T0\r\n", Duration::ZERO).unwrap();
        assert_eq!(link.frames_written(), 2);
    }
}
