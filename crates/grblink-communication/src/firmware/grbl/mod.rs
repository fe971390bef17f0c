//! Grbl protocol implementation
//!
//! - `decoder`: classifies every received line and parses status reports
//! - `codes`: fixed error/alarm description tables
//! - `modal`: `[GC:...]` parser-state decoding and the modal lookup table
//! - `engine`: the façade collaborators talk to, with the worker loop

pub mod codes;
pub mod decoder;
pub mod engine;
pub mod modal;

pub use engine::{realtime, CommandHandle, ConnectionInfo, GrblEngine, LifecycleState};
