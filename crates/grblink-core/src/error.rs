//! Error handling for grblink
//!
//! Three layers, matching how failures propagate through the engine:
//! - [`TransportError`]: serial I/O failures, fatal to the connection
//! - [`ConnectError`]: failures of a connect attempt, including the
//!   initialization handshake timeout
//! - [`EngineError`]: failures of individual engine operations
//!
//! All error types use `thiserror` and carry owned message strings so they
//! stay `Clone` and can travel through channels and events.

use thiserror::Error;

/// Serial transport error
///
/// Any read/write failure after a successful open is fatal to the
/// connection: the worker loop terminates and surfaces it once as a
/// `ConnectionLost` event. Open failures are reported to the caller and
/// never retried automatically.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Port could not be opened (busy, missing, permission denied)
    #[error("failed to open {port}: {message}")]
    OpenFailed {
        /// The port that was requested.
        port: String,
        /// The underlying error text.
        message: String,
    },

    /// Read from the port failed
    #[error("serial read failed: {message}")]
    Read {
        /// The underlying error text.
        message: String,
    },

    /// Write to the port failed
    #[error("serial write failed: {message}")]
    Write {
        /// The underlying error text.
        message: String,
    },

    /// Operation attempted on a closed port
    #[error("port is closed")]
    Closed,
}

impl TransportError {
    /// Build a read error from anything displayable
    pub fn read(err: impl std::fmt::Display) -> Self {
        Self::Read {
            message: err.to_string(),
        }
    }

    /// Build a write error from anything displayable
    pub fn write(err: impl std::fmt::Display) -> Self {
        Self::Write {
            message: err.to_string(),
        }
    }
}

/// Failure of a connect attempt
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    /// A connection is already active; disconnect first
    #[error("already connected")]
    AlreadyConnected,

    /// The transport failed while opening or during initialization
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No startup banner arrived before the timeout, even after one
    /// soft-reset retry
    #[error("no Grbl startup banner within {timeout_ms} ms (soft reset retried once)")]
    InitializationTimeout {
        /// The configured timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The attempt was cancelled before the handshake finished
    #[error("connection attempt aborted")]
    Aborted,
}

/// Engine operation error
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Operation requires an active connection
    #[error("engine is not connected")]
    NotConnected,

    /// Command was refused before reaching the firmware
    #[error("command rejected: {reason}")]
    CommandRejected {
        /// Why the command was refused.
        reason: String,
    },

    /// Transport failure surfaced through an engine operation
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_messages() {
        let e = TransportError::OpenFailed {
            port: "/dev/ttyUSB0".to_string(),
            message: "device busy".to_string(),
        };
        assert_eq!(e.to_string(), "failed to open /dev/ttyUSB0: device busy");

        let e = TransportError::read("boom");
        assert_eq!(e.to_string(), "serial read failed: boom");
    }

    #[test]
    fn connect_error_wraps_transport() {
        let e: ConnectError = TransportError::Closed.into();
        assert_eq!(e.to_string(), "port is closed");
    }

    #[test]
    fn init_timeout_message_names_the_budget() {
        let e = ConnectError::InitializationTimeout { timeout_ms: 2000 };
        assert!(e.to_string().contains("2000 ms"));
    }
}
