//! Transport and flow-control building blocks
//!
//! `serial` owns the physical link; `flow_control` owns the byte-budget
//! accounting that keeps the firmware's receive buffer from overrunning.

pub mod flow_control;
pub mod serial;
