//! DoCAN transport service: admission of transmit requests, frame dispatch,
//! runner scheduling and completion notifications.
//!
//! The service is driven by polling. [`DoCanService::run_step`] performs one
//! scheduler tick (rate limited by the configured run period) and
//! [`DoCanService::run_ack_step`] drains transmission outcomes; both take
//! `&self` and may be called from different threads. [`DoCanService::drive`]
//! runs both forever on `embassy-time` tickers.
//!
//! Runners live in three places: requests not started yet wait in a FIFO,
//! running conversations are keyed by their [`NAi`] (at most one per
//! identifier), and finished runners are retired at the end of the tick that
//! saw them finish.
pub mod config;
pub mod driver;
pub mod listener;

use crate::core::{Mtype, StepOutcome};
use crate::error::{ConfigError, LockTimeout, RequestError, TransferError};
use crate::infra::budget::MemoryBudget;
use crate::infra::sync::TimedMutex;
use crate::protocol::runner::{
    MessageRunner, ReceiverRunner, RunnerCell, RunnerHandle, RunnerRole, SenderRunner,
};
use crate::protocol::transport::ack_queue::AckQueue;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::n_ai::{NAi, TargetAddressType};
use crate::protocol::transport::pdu::StMin;
use crate::protocol::transport::traits::can_interface::CanInterface;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use embassy_time::{Duration, Instant};

pub use config::{ServiceConfig, DEFAULT_MEMORY_BUDGET};
pub use listener::{ChannelListener, TransportEvent, TransportListener};

use config::Settings;

//==================================================================================RUNNER_SETS
#[derive(Default)]
struct RunnerSets {
    active: BTreeMap<NAi, RunnerHandle>,
    finished: Vec<RunnerHandle>,
}

//==================================================================================DOCAN_SERVICE
/// ISO 15765-2 transport service over one CAN interface.
pub struct DoCanService<C: CanInterface, L: TransportListener> {
    can: C,
    listener: L,
    settings: TimedMutex<Settings>,
    pending: TimedMutex<VecDeque<RunnerHandle>>,
    runners: TimedMutex<RunnerSets>,
    acks: AckQueue,
    budget: Arc<MemoryBudget>,
    /// Held for the whole tick; records when the last one started.
    tick_gate: TimedMutex<Option<Instant>>,
    run_period: Duration,
    ack_period: Duration,
    lock_timeout: Duration,
    wait_frame_limit: Option<u8>,
}

impl<C: CanInterface, L: TransportListener> DoCanService<C, L> {
    /// Build a service. Fails if the configured STmin cannot be encoded.
    pub fn new(can: C, listener: L, config: ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let lock_timeout = config.lock_timeout;
        let budget = i64::try_from(config.memory_budget).unwrap_or(i64::MAX);

        Ok(Self {
            can,
            listener,
            settings: TimedMutex::new(Settings::from(&config), lock_timeout),
            pending: TimedMutex::new(VecDeque::new(), lock_timeout),
            runners: TimedMutex::new(RunnerSets::default(), lock_timeout),
            acks: AckQueue::new(lock_timeout),
            budget: Arc::new(MemoryBudget::new(budget)),
            tick_gate: TimedMutex::new(None, lock_timeout),
            run_period: config.run_period,
            ack_period: config.ack_period,
            lock_timeout,
            wait_frame_limit: config.wait_frame_limit,
        })
    }

    #[inline]
    pub fn can(&self) -> &C {
        &self.can
    }

    #[inline]
    pub fn listener(&self) -> &L {
        &self.listener
    }

    //==================================================================================REQUESTS
    /// Queue `message` for transmission to `target`.
    ///
    /// The message is copied and its memory reserved immediately; the
    /// transfer starts at a later tick, once no other runner holds the same
    /// identifier. The outcome arrives through [`TransportListener::on_confirm`].
    pub fn request(
        &self,
        target: u8,
        target_type: TargetAddressType,
        message: &[u8],
        mtype: Mtype,
    ) -> Result<(), RequestError> {
        let source = self.settings.lock()?.source_address;
        let n_ai = NAi::new(target_type, target, source);
        let runner = SenderRunner::new(n_ai, message, mtype, &self.budget, self.wait_frame_limit)
            .inspect_err(|_e| {
                #[cfg(feature = "defmt")]
                defmt::warn!("request for {} refused: {}", n_ai, _e);
            })?;
        let handle = RunnerCell::new(MessageRunner::Sender(runner), self.lock_timeout);
        self.pending.lock()?.push_back(handle);

        #[cfg(feature = "defmt")]
        defmt::debug!("request queued for {} ({} bytes)", n_ai, message.len());
        Ok(())
    }

    //==================================================================================SCHEDULER
    /// One scheduler tick, skipped when the CAN interface is inactive, when
    /// the previous tick started less than the run period ago, or while
    /// another tick is in progress.
    pub fn run_step(&self) {
        if !self.can.active() {
            return;
        }
        let Ok(mut last_tick) = self.tick_gate.try_lock() else {
            return;
        };
        let now = Instant::now();
        if let Some(at) = *last_tick {
            if now.saturating_duration_since(at) < self.run_period {
                return;
            }
        }
        *last_tick = Some(now);
        self.tick();
    }

    /// Drain available transmission outcomes and deliver their callbacks.
    pub fn run_ack_step(&self) {
        while self.acks.run_step(&self.can) {}
        self.acks.run_available_ack_callbacks();
    }

    /// Tick body. Callers hold the tick gate.
    ///
    /// Outcomes already reported are delivered first so that a runner whose
    /// frame went out is ready for the peer's answer.
    fn tick(&self) {
        let Ok(settings) = self.settings.lock().map(|settings| settings.clone()) else {
            return;
        };
        self.run_ack_step();
        self.promote_pending();

        let frame = self.read_frame(&settings);
        let Ok(active) = self
            .runners
            .lock()
            .map(|sets| sets.active.values().cloned().collect::<Vec<_>>())
        else {
            return;
        };

        let now = Instant::now();
        let mut claimed = false;
        for runner in &active {
            let outcome = match frame {
                Some(ref frame)
                    if !claimed && runner.accepts(frame.id) && runner.awaiting_message() =>
                {
                    claimed = true;
                    runner.step(Some(frame), &self.can, &self.acks)
                }
                _ if runner.is_due(now) => runner.step(None, &self.can, &self.acks),
                _ => continue,
            };
            self.route(runner, outcome);
        }

        if let (Some(frame), false) = (frame, claimed) {
            self.spawn_receiver(&frame, &settings);
        }
        self.retire_finished();
    }

    /// Move queued requests to the active set, oldest first, skipping any
    /// whose identifier is still busy.
    fn promote_pending(&self) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        let Ok(mut sets) = self.runners.lock() else {
            return;
        };
        let mut waiting = VecDeque::new();
        while let Some(runner) = pending.pop_front() {
            let n_ai = runner.n_ai();
            if sets.active.contains_key(&n_ai) {
                waiting.push_back(runner);
            } else {
                #[cfg(feature = "defmt")]
                defmt::debug!("starting transfer on {}", n_ai);
                sets.active.insert(n_ai, runner);
            }
        }
        *pending = waiting;
    }

    /// Read one frame and keep it if it is addressed to this node.
    fn read_frame(&self, settings: &Settings) -> Option<CanFrame> {
        if self.can.frame_available() == 0 {
            return None;
        }
        let frame = self.can.read_frame()?;
        if !frame.is_transport_candidate() || !frame.id.is_valid() {
            return None;
        }
        let target = frame.id.target_address();
        let accepted = match frame.id.target_type() {
            Some(TargetAddressType::Physical) => target == settings.source_address,
            Some(TargetAddressType::Functional) => settings.functional_addresses.contains(&target),
            None => false,
        };
        accepted.then_some(frame)
    }

    /// Start a receiver for an unclaimed frame.
    fn spawn_receiver(&self, frame: &CanFrame, settings: &Settings) {
        let handle = {
            let Ok(mut sets) = self.runners.lock() else {
                return;
            };
            if sets.active.contains_key(&frame.id) {
                #[cfg(feature = "defmt")]
                defmt::debug!("frame on busy identifier {} dropped", frame.id);
                return;
            }
            let receiver =
                ReceiverRunner::new(frame.id, &self.budget, settings.block_size, settings.st_min);
            let runner = match receiver {
                Ok(runner) => runner,
                Err(_e) => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("no memory for a receiver on {}: {}", frame.id, _e);
                    return;
                }
            };
            let handle = RunnerCell::new(MessageRunner::Receiver(runner), self.lock_timeout);
            sets.active.insert(frame.id, Arc::clone(&handle));
            handle
        };
        let outcome = handle.step(Some(frame), &self.can, &self.acks);
        self.route(&handle, outcome);
    }

    fn route(&self, runner: &RunnerHandle, outcome: StepOutcome) {
        match outcome {
            StepOutcome::InProgress => {}
            StepOutcome::FirstFrameReceived { length } => {
                self.listener
                    .on_first_frame_indication(runner.n_ai(), length, runner.mtype());
            }
            StepOutcome::Finished(_) => match self.runners.lock() {
                Ok(mut sets) => sets.finished.push(Arc::clone(runner)),
                // Still active with a latched result: retried next tick.
                Err(LockTimeout) => {}
            },
        }
    }

    /// Retire finished runners: drop them from the active set, purge their
    /// pending acknowledgements, notify the application.
    fn retire_finished(&self) {
        let retired: Vec<RunnerHandle> = {
            let Ok(mut sets) = self.runners.lock() else {
                return;
            };
            let finished = core::mem::take(&mut sets.finished);
            finished
                .into_iter()
                .filter(|runner| {
                    let n_ai = runner.n_ai();
                    let current = sets
                        .active
                        .get(&n_ai)
                        .is_some_and(|active| Arc::ptr_eq(active, runner));
                    if current {
                        sets.active.remove(&n_ai);
                    }
                    current
                })
                .collect()
        };

        for runner in retired {
            if self.acks.remove_from_queue(runner.n_ai()).is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("ack queue locked, entries of {} left to expire", runner.n_ai());
            }
            self.notify_completion(&runner);
        }
    }

    fn notify_completion(&self, runner: &RunnerHandle) {
        let n_ai = runner.n_ai();
        let mtype = runner.mtype();
        match runner.lock() {
            Ok(guard) => match &*guard {
                MessageRunner::Sender(sender) => {
                    let result = sender.result().unwrap_or(Err(TransferError::Internal));
                    self.listener.on_confirm(n_ai, result, mtype);
                }
                MessageRunner::Receiver(receiver) => {
                    let result = receiver.result().unwrap_or(Err(TransferError::Internal));
                    self.listener
                        .on_indication(n_ai, receiver.message(), result, mtype);
                }
            },
            Err(LockTimeout) => match runner.role() {
                RunnerRole::Sender => {
                    self.listener
                        .on_confirm(n_ai, Err(TransferError::Internal), mtype)
                }
                RunnerRole::Receiver => {
                    self.listener
                        .on_indication(n_ai, &[], Err(TransferError::Internal), mtype)
                }
            },
        }
    }

    //==================================================================================CONFIGURATION
    /// This node's source address (N_SA).
    pub fn source_address(&self) -> Result<u8, LockTimeout> {
        Ok(self.settings.lock()?.source_address)
    }

    /// Change N_SA. Affects requests made afterwards and inbound filtering.
    pub fn set_source_address(&self, source_address: u8) -> Result<(), LockTimeout> {
        self.settings.lock()?.source_address = source_address;
        Ok(())
    }

    /// Accept functional frames addressed to `target`. `false` if already accepted.
    pub fn add_functional_address(&self, target: u8) -> Result<bool, LockTimeout> {
        Ok(self.settings.lock()?.functional_addresses.insert(target))
    }

    /// Stop accepting functional frames for `target`. `false` if it was not accepted.
    pub fn remove_functional_address(&self, target: u8) -> Result<bool, LockTimeout> {
        Ok(self.settings.lock()?.functional_addresses.remove(&target))
    }

    pub fn accepts_functional_address(&self, target: u8) -> Result<bool, LockTimeout> {
        Ok(self.settings.lock()?.functional_addresses.contains(&target))
    }

    /// Block size advertised in our Flow Control frames.
    pub fn block_size(&self) -> Result<u8, LockTimeout> {
        Ok(self.settings.lock()?.block_size)
    }

    /// Change the advertised block size, including for receptions in
    /// progress (from their next Flow Control).
    pub fn set_block_size(&self, block_size: u8) -> Result<(), LockTimeout> {
        self.settings.lock()?.block_size = block_size;
        self.for_each_runner(|runner| runner.set_block_size(block_size))
    }

    /// STmin advertised in our Flow Control frames.
    pub fn st_min(&self) -> Result<StMin, LockTimeout> {
        Ok(self.settings.lock()?.st_min)
    }

    /// Change the advertised STmin, including for receptions in progress.
    pub fn set_st_min(&self, st_min: StMin) -> Result<(), ConfigError> {
        st_min.validate()?;
        self.settings.lock()?.st_min = st_min;
        self.for_each_runner(|runner| runner.set_st_min(st_min))?;
        Ok(())
    }

    fn for_each_runner(&self, apply: impl Fn(&mut MessageRunner)) -> Result<(), LockTimeout> {
        let mut handles: Vec<RunnerHandle> = self.pending.lock()?.iter().cloned().collect();
        handles.extend(self.runners.lock()?.active.values().cloned());
        for handle in handles {
            let mut runner = handle.lock()?;
            apply(&mut *runner);
        }
        Ok(())
    }

    //==================================================================================DIAGNOSTICS
    /// Bytes left in the shared memory budget.
    pub fn available_memory(&self) -> i64 {
        self.budget.get()
    }

    /// Requests waiting to start.
    pub fn pending_count(&self) -> Result<usize, LockTimeout> {
        Ok(self.pending.lock()?.len())
    }

    /// Conversations in progress.
    pub fn active_count(&self) -> Result<usize, LockTimeout> {
        Ok(self.runners.lock()?.active.len())
    }

    /// Written frames still waiting for their transmission outcome.
    pub fn unacknowledged_count(&self) -> Result<usize, LockTimeout> {
        self.acks.len()
    }
}
