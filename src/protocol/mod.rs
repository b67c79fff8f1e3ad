//! High-level components of the ISO 15765-2 stack: CAN/PDU transport,
//! per-message runners and the scheduling service.
pub mod runner;
pub mod service;
pub mod transport;
