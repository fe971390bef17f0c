//! # grblink Communication
//!
//! The Grbl communication engine: serial transport, character-counted flow
//! control against the firmware's fixed receive buffer, FIFO response
//! correlation, the line decoder for Grbl's status/response telegrams, and
//! the engine façade that ties them together around a single worker loop.

pub mod communication;
pub mod firmware;

pub use communication::{
    flow_control::{FlowControlQueue, PendingLedger, QueuedCommand},
    serial::{list_ports, ReadOutcome, SerialPortInfo, SerialTransport, Transport},
};

pub use firmware::grbl::{
    codes, decoder::GrblDecoder, decoder::GrblResponse, decoder::StatusReport, modal, realtime,
    CommandHandle, ConnectionInfo, GrblEngine, LifecycleState,
};
