//! # grblink Core
//!
//! Foundation crate for the grblink communication engine: the machine-state
//! data model, the engine event set and event bus, the error taxonomy, and
//! engine configuration. The serial protocol itself lives in
//! `grblink-communication`.

pub mod config;
pub mod error;
pub mod event;
pub mod machine;

pub use config::{ConnectionParams, EngineConfig, GRBL_RX_BUFFER_SIZE};
pub use error::{ConnectError, EngineError, Result, TransportError};
pub use event::{
    EngineEvent, EngineListener, EventBus, EventCategory, EventFilter, SubscriptionId,
};
pub use machine::{
    Accessories, BufferFill, GcodeModal, GcodeParserState, MachineState, Overrides, Position,
    RunState,
};
