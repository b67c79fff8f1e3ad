//! `korri-docan` library: ISO 15765-2 (ISO-TP / DoCAN) transport layer for
//! 29-bit normal fixed addressing in a `no_std` + `alloc` environment.
//! The crate exposes the infrastructure modules (timers, bounded locks, the
//! shared memory budget), the transport primitives (identifiers, PDU codec,
//! CAN interface, acknowledgement queue), the per-message runners and the
//! scheduling service.
#![cfg_attr(not(test), no_std)]
//==================================================================================
extern crate alloc;
//==================================================================================
/// Data contract shared by runners, scheduler and application: `Mtype`,
/// step outcomes, `N_Result`.
pub mod core;
/// Transfer results and the errors of admission, configuration, identifier
/// decoding and lock acquisition.
pub mod error;
/// Timers, bounded-wait locks and the memory budget.
pub mod infra;
/// ISO 15765-2 implementation: transport primitives, message runners and
/// the transport service.
pub mod protocol;
//==================================================================================
