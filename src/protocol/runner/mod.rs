//! Per-conversation protocol state machines.
//!
//! A [`MessageRunner`] drives one message exchange: a [`SenderRunner`]
//! segments an outbound message, a [`ReceiverRunner`] reassembles an inbound
//! one. The scheduler owns runners through [`RunnerHandle`]s; each runner sits
//! behind its own bounded-wait lock because transmit acknowledgements may be
//! delivered from another thread than the one stepping it.
pub mod receiver;
pub mod sender;

use crate::core::{Mtype, NResult, StepOutcome};
use crate::error::{LockTimeout, TransferError};
use crate::infra::sync::{TimedGuard, TimedMutex};
use crate::protocol::transport::ack_queue::AckQueue;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::n_ai::NAi;
use crate::protocol::transport::pdu::StMin;
use crate::protocol::transport::traits::can_interface::{CanInterface, FrameAck};
use alloc::sync::Arc;
use embassy_time::{Duration, Instant};

pub use receiver::{ReceiverRunner, ReceiverState};
pub use sender::{SenderRunner, SenderState};

/// Shared, owning handle on a runner.
pub type RunnerHandle = Arc<RunnerCell>;

//==================================================================================ROLE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Direction of the exchange a runner drives.
pub enum RunnerRole {
    Sender,
    Receiver,
}

//==================================================================================MESSAGE_RUNNER
/// Closed set of runner variants.
#[derive(Debug)]
pub enum MessageRunner {
    Sender(SenderRunner),
    Receiver(ReceiverRunner),
}

impl MessageRunner {
    /// Addressing identifier keying this runner.
    pub fn n_ai(&self) -> NAi {
        match self {
            MessageRunner::Sender(runner) => runner.n_ai(),
            MessageRunner::Receiver(runner) => runner.n_ai(),
        }
    }

    pub fn mtype(&self) -> Mtype {
        match self {
            MessageRunner::Sender(runner) => runner.mtype(),
            MessageRunner::Receiver(runner) => runner.mtype(),
        }
    }

    pub fn role(&self) -> RunnerRole {
        match self {
            MessageRunner::Sender(_) => RunnerRole::Sender,
            MessageRunner::Receiver(_) => RunnerRole::Receiver,
        }
    }

    /// Advance the state machine by one step.
    pub fn step<C: CanInterface>(
        &mut self,
        frame: Option<&CanFrame>,
        link: &FrameLink<'_, C>,
    ) -> StepOutcome {
        match self {
            MessageRunner::Sender(runner) => runner.step(frame, link),
            MessageRunner::Receiver(runner) => runner.step(frame, link),
        }
    }

    /// Transmission outcome of the oldest frame this runner wrote.
    pub fn on_ack(&mut self, ack: FrameAck) {
        match self {
            MessageRunner::Sender(runner) => runner.on_ack(ack),
            MessageRunner::Receiver(runner) => runner.on_ack(ack),
        }
    }

    /// `true` when the runner waits for an inbound frame rather than an acknowledgement.
    pub fn awaiting_message(&self) -> bool {
        match self {
            MessageRunner::Sender(runner) => runner.awaiting_message(),
            MessageRunner::Receiver(runner) => runner.awaiting_message(),
        }
    }

    /// Earliest instant the runner has something to do; `None` means now.
    pub fn next_run_at(&self) -> Option<Instant> {
        match self {
            MessageRunner::Sender(runner) => runner.next_run_at(),
            MessageRunner::Receiver(_) => None,
        }
    }

    /// Latched terminal result, if any.
    pub fn result(&self) -> Option<NResult> {
        match self {
            MessageRunner::Sender(runner) => runner.result(),
            MessageRunner::Receiver(runner) => runner.result(),
        }
    }

    /// Block size for our next Flow Control. Senders follow the peer instead.
    pub fn set_block_size(&mut self, block_size: u8) {
        if let MessageRunner::Receiver(runner) = self {
            runner.set_block_size(block_size);
        }
    }

    /// STmin for our next Flow Control. Senders follow the peer instead.
    pub fn set_st_min(&mut self, st_min: StMin) {
        if let MessageRunner::Receiver(runner) = self {
            runner.set_st_min(st_min);
        }
    }
}

//==================================================================================FRAME_LINK
/// Write path handed to a runner while it steps: frames go to the CAN
/// interface through the acknowledgement queue, tagged with their owner.
pub struct FrameLink<'a, C: CanInterface> {
    can: &'a C,
    acks: &'a AckQueue,
    owner: &'a RunnerHandle,
}

impl<'a, C: CanInterface> FrameLink<'a, C> {
    pub fn new(can: &'a C, acks: &'a AckQueue, owner: &'a RunnerHandle) -> Self {
        Self { can, acks, owner }
    }

    /// Write `frame`; `false` when the CAN interface refused it.
    pub fn send(&self, frame: &CanFrame) -> bool {
        self.acks.write_frame(self.can, self.owner, frame)
    }
}

//==================================================================================RUNNER_CELL
/// A runner behind its own lock, plus the immutable facts the scheduler
/// needs without locking.
#[derive(Debug)]
pub struct RunnerCell {
    n_ai: NAi,
    mtype: Mtype,
    role: RunnerRole,
    runner: TimedMutex<MessageRunner>,
}

impl RunnerCell {
    /// Wrap a runner; every later lock waits at most `lock_timeout`.
    pub fn new(runner: MessageRunner, lock_timeout: Duration) -> RunnerHandle {
        Arc::new(Self {
            n_ai: runner.n_ai(),
            mtype: runner.mtype(),
            role: runner.role(),
            runner: TimedMutex::new(runner, lock_timeout),
        })
    }

    #[inline]
    pub fn n_ai(&self) -> NAi {
        self.n_ai
    }

    #[inline]
    pub fn mtype(&self) -> Mtype {
        self.mtype
    }

    #[inline]
    pub fn role(&self) -> RunnerRole {
        self.role
    }

    /// Whether an inbound frame with identifier `id` belongs to this conversation.
    ///
    /// A receiver listens on its own identifier; a sender listens for Flow
    /// Control frames coming back from its target.
    pub fn accepts(&self, id: NAi) -> bool {
        match self.role {
            RunnerRole::Receiver => id == self.n_ai,
            RunnerRole::Sender => id == self.n_ai.reversed(),
        }
    }

    /// Lock the runner.
    pub fn lock(&self) -> Result<TimedGuard<'_, MessageRunner>, LockTimeout> {
        self.runner.lock()
    }

    /// Step the runner. A lock timeout terminates it with an internal error.
    pub fn step<C: CanInterface>(
        self: &Arc<Self>,
        frame: Option<&CanFrame>,
        can: &C,
        acks: &AckQueue,
    ) -> StepOutcome {
        let link = FrameLink::new(can, acks, self);
        match self.runner.lock() {
            Ok(mut runner) => runner.step(frame, &link),
            Err(LockTimeout) => StepOutcome::Finished(Err(TransferError::Internal)),
        }
    }

    /// Deliver a transmission outcome.
    pub fn on_ack(&self, ack: FrameAck) {
        match self.runner.lock() {
            Ok(mut runner) => runner.on_ack(ack),
            Err(LockTimeout) => {
                // The frame stays unconfirmed; N_As / N_Ar will expire.
                #[cfg(feature = "defmt")]
                defmt::warn!("ack for {} dropped: runner locked", self.n_ai);
            }
        }
    }

    /// Waiting for an inbound frame. `false` if the runner cannot be locked.
    pub fn awaiting_message(&self) -> bool {
        self.runner
            .lock()
            .map(|runner| runner.awaiting_message())
            .unwrap_or(false)
    }

    /// Whether the runner is due for a step at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.runner.lock() {
            Ok(runner) => runner.next_run_at().map_or(true, |at| now >= at),
            Err(LockTimeout) => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing;
