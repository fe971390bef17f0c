//! # grblink
//!
//! A serial communication engine for Grbl CNC controllers:
//! character-counted flow control against the firmware's fixed receive
//! buffer, FIFO response correlation, real-time command bypass, and a
//! decoded event stream over the Grbl 1.1 wire protocol.
//!
//! ## Architecture
//!
//! grblink is organized as a workspace:
//!
//! 1. **grblink-core** - Machine-state model, events, errors, configuration
//! 2. **grblink-communication** - Serial transport, flow control, the Grbl
//!    decoder and engine
//! 3. **grblink** - Diagnostic console binary on top of the engine

pub use grblink_communication::{
    codes, list_ports, modal, realtime, CommandHandle, ConnectionInfo, FlowControlQueue,
    GrblDecoder, GrblEngine, GrblResponse, LifecycleState, QueuedCommand, SerialPortInfo,
    SerialTransport, StatusReport, Transport,
};

pub use grblink_core::{
    ConnectError, ConnectionParams, EngineConfig, EngineError, EngineEvent, EngineListener,
    EventBus, EventCategory, EventFilter, GcodeParserState, MachineState, Position, RunState,
    SubscriptionId, TransportError, GRBL_RX_BUFFER_SIZE,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Structured logging to stderr with `RUST_LOG` environment variable
/// support, defaulting to `info`. Stderr keeps log lines out of the
/// console's interactive output.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
