//! Engine configuration
//!
//! Every timing and sizing knob the engine uses is an explicit value passed
//! in at construction. Nothing here is process-wide state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of the Grbl serial receive buffer in bytes.
///
/// Classic Grbl on a 328p reserves 128 bytes and keeps one for bookkeeping,
/// leaving 127 usable. Builds with larger buffers can raise
/// [`EngineConfig::rx_buffer_capacity`] at connect time.
pub const GRBL_RX_BUFFER_SIZE: usize = 127;

/// Tuning for one engine instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Usable firmware receive-buffer capacity for flow control
    pub rx_buffer_capacity: usize,
    /// How often the worker sends the `?` status poll while ready
    pub poll_interval: Duration,
    /// How long to wait for the startup banner before a soft-reset retry,
    /// and again after it
    pub init_timeout: Duration,
    /// Bounded blocking-read timeout; sets how quickly the worker notices
    /// submissions, the poll timer, and the abort flag on a silent link
    pub read_timeout: Duration,
    /// Broadcast channel capacity for published events
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rx_buffer_capacity: GRBL_RX_BUFFER_SIZE,
            poll_interval: Duration::from_millis(200),
            init_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_millis(25),
            event_capacity: 256,
        }
    }
}

/// What to connect to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Baud rate; Grbl defaults to 115200
    pub baud_rate: u32,
    /// Expected axis count, 3 to 6; used for decode sanity checks
    pub axis_count: u8,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            axis_count: 3,
        }
    }
}

impl ConnectionParams {
    /// Axis count clamped to the 3..=6 range Grbl builds support
    pub fn effective_axis_count(&self) -> u8 {
        self.axis_count.clamp(3, 6)
    }
}
