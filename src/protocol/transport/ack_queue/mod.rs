//! Transmit-acknowledgement correlation.
//!
//! The CAN interface reports transmission outcomes in write order but without
//! saying which frame they belong to. Every frame a runner writes therefore
//! goes through [`AckQueue::write_frame`], which appends an entry naming the
//! writer while still holding the queue lock; outcomes polled later are
//! matched against the oldest entry still waiting for one.
//!
//! Callbacks are delivered strictly in FIFO order: an entry whose outcome is
//! known waits behind an older entry whose outcome is not. Entries hold a weak
//! reference so a retired runner never receives a callback.
//!
//! Retiring a runner detaches its unresolved entries instead of dropping them.
//! A detached entry still takes the next outcome in write order, so a late
//! outcome for a retired runner's frame cannot be credited to a newer frame.
//! Detached entries never hold back delivery and are dropped once resolved or
//! after [`ACK_DETACHED_TTL_MS`].
use crate::error::LockTimeout;
use crate::infra::sync::TimedMutex;
use crate::protocol::runner::{RunnerCell, RunnerHandle};
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::n_ai::NAi;
use crate::protocol::transport::traits::can_interface::{CanInterface, FrameAck};
use crate::protocol::transport::ACK_DETACHED_TTL_MS;
use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use embassy_time::{Duration, Instant};

//==================================================================================ACK_ENTRY
#[derive(Debug)]
struct AckEntry {
    n_ai: NAi,
    runner: Weak<RunnerCell>,
    outcome: Option<FrameAck>,
    detached_at: Option<Instant>,
}

impl AckEntry {
    fn is_detached(&self) -> bool {
        self.detached_at.is_some()
    }

    /// Detached and either resolved or past its time to live.
    fn is_spent(&self) -> bool {
        let ttl = Duration::from_millis(u64::from(ACK_DETACHED_TTL_MS));
        self.detached_at
            .is_some_and(|at| self.outcome.is_some() || at.elapsed() >= ttl)
    }
}

//==================================================================================ACK_QUEUE
/// FIFO of written frames awaiting their transmission outcome.
#[derive(Debug)]
pub struct AckQueue {
    entries: TimedMutex<VecDeque<AckEntry>>,
}

impl AckQueue {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            entries: TimedMutex::new(VecDeque::new(), lock_timeout),
        }
    }

    /// Write `frame` on behalf of `owner` and enqueue an entry for its outcome.
    ///
    /// The entry is appended only if the interface accepted the frame. Returns
    /// `false` when the write was refused or the queue lock timed out.
    pub fn write_frame<C: CanInterface>(&self, can: &C, owner: &RunnerHandle, frame: &CanFrame) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        match can.write_frame(frame) {
            Ok(()) => {
                entries.push_back(AckEntry {
                    n_ai: owner.n_ai(),
                    runner: Arc::downgrade(owner),
                    outcome: None,
                    detached_at: None,
                });
                true
            }
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("CAN write refused for {}", owner.n_ai());
                false
            }
        }
    }

    /// Poll one transmission outcome and record it on the oldest entry still
    /// lacking one.
    ///
    /// Detached entries take part in the matching. Returns `true` if an
    /// outcome was recorded; outcomes with no waiting entry are discarded.
    pub fn run_step<C: CanInterface>(&self, can: &C) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        let Some(outcome) = can.write_frame_ack() else {
            return false;
        };
        match entries.iter_mut().find(|entry| entry.outcome.is_none()) {
            Some(entry) => {
                entry.outcome = Some(outcome);
                true
            }
            None => {
                #[cfg(feature = "defmt")]
                defmt::debug!("unmatched transmit outcome {}", outcome);
                false
            }
        }
    }

    /// Deliver every resolved outcome at the head of the queue, in order.
    ///
    /// Spent detached entries are dropped first and unresolved detached ones
    /// are stepped over. Each delivered entry is taken out under the queue
    /// lock and its runner is called after the lock is released. Returns the
    /// number of callbacks delivered.
    pub fn run_available_ack_callbacks(&self) -> usize {
        let mut delivered = 0;
        loop {
            let resolved = {
                let Ok(mut entries) = self.entries.lock() else {
                    break;
                };
                entries.retain(|entry| !entry.is_spent());
                match entries.iter().position(|entry| !entry.is_detached()) {
                    Some(head) if entries[head].outcome.is_some() => entries.remove(head),
                    _ => None,
                }
            };
            let Some(entry) = resolved else {
                break;
            };
            if let (Some(runner), Some(outcome)) = (entry.runner.upgrade(), entry.outcome) {
                runner.on_ack(outcome);
                delivered += 1;
            }
        }
        delivered
    }

    /// Release every entry written by the runner keyed `n_ai`: resolved ones
    /// are dropped, unresolved ones are detached to absorb their outcome.
    /// Returns how many entries were released.
    pub fn remove_from_queue(&self, n_ai: NAi) -> Result<usize, LockTimeout> {
        let mut entries = self.entries.lock()?;
        let before = entries.len();
        entries.retain(|entry| entry.n_ai != n_ai || entry.outcome.is_none());

        let now = Instant::now();
        let mut detached = 0;
        for entry in entries
            .iter_mut()
            .filter(|entry| entry.n_ai == n_ai && !entry.is_detached())
        {
            entry.runner = Weak::new();
            entry.detached_at = Some(now);
            detached += 1;
        }
        Ok(before - entries.len() + detached)
    }

    /// Entries written by live runners and not yet delivered.
    pub fn len(&self) -> Result<usize, LockTimeout> {
        Ok(self.entries.lock()?.iter().filter(|entry| !entry.is_detached()).count())
    }

    pub fn is_empty(&self) -> Result<bool, LockTimeout> {
        Ok(self.len()? == 0)
    }

    /// Detached entries still waiting for their outcome.
    pub fn detached_len(&self) -> Result<usize, LockTimeout> {
        Ok(self.entries.lock()?.iter().filter(|entry| entry.is_detached()).count())
    }
}
