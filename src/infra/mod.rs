//! Building blocks independent of the protocol: stopwatch timers, bounded
//! locks and the shared memory budget.
pub mod budget;
pub mod sync;
pub mod timer;
