//! Firmware protocol implementations
//!
//! Only Grbl (1.1 wire format) is implemented. The module keeps the
//! firmware/transport split so another line-oriented controller protocol
//! could slot in beside it.

pub mod grbl;
