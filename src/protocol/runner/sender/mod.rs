//! Sending side of one ISO 15765-2 exchange.
//!
//! ```text
//! NOT_RUNNING_SF --SF--> AWAITING_SF_ACK --ack--> MESSAGE_SENT
//! NOT_RUNNING_FF --FF--> AWAITING_FF_ACK --ack--> AWAITING_FIRST_FC
//! AWAITING_(FIRST_)FC --CTS--> SEND_CF --CF--> AWAITING_CF_ACK
//! AWAITING_CF_ACK --ack--> SEND_CF | AWAITING_FC (block done) | MESSAGE_SENT
//! ```
//! Any failure latches `ERROR` with its result.
use crate::core::{Mtype, NResult, StepOutcome};
use crate::error::{RequestError, TransferError};
use crate::infra::budget::{MemoryBudget, Reservation};
use crate::infra::timer::Timer;
use crate::protocol::runner::FrameLink;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::n_ai::{NAi, TargetAddressType};
use crate::protocol::transport::pdu::{
    encode_consecutive_frame, encode_first_frame, encode_single_frame, next_sequence_number,
    FlowStatus, PduType, StMin, CF_PAYLOAD, FC_DLC,
};
use crate::protocol::transport::traits::can_interface::{CanInterface, FrameAck};
use crate::protocol::transport::{
    MAX_SF_PAYLOAD, N_AS_TIMEOUT_MS, N_BS_TIMEOUT_MS, N_CS_MAX_MS, RUNNER_TAG_BYTES,
};
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use embassy_time::Instant;

//==================================================================================SENDER_STATE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SenderState {
    NotRunningSf,
    AwaitingSfAck,
    NotRunningFf,
    AwaitingFfAck,
    AwaitingFirstFc,
    AwaitingFc,
    SendCf,
    AwaitingCfAck,
    MessageSent,
    Error,
}

//==================================================================================SENDER_RUNNER
/// Segments one outbound message.
#[derive(Debug)]
pub struct SenderRunner {
    n_ai: NAi,
    mtype: Mtype,
    tag: String,
    state: SenderState,
    message: Vec<u8>,
    offset: usize,
    sequence_number: u8,
    block_size: u8,
    st_min: StMin,
    frames_in_block: u8,
    wait_frames: u8,
    wait_frame_limit: Option<u8>,
    last_cf_at: Option<Instant>,
    n_as: Timer,
    n_bs: Timer,
    n_cs: Timer,
    n_cs_reported: bool,
    result: Option<NResult>,
    _reservation: Reservation,
}

impl SenderRunner {
    /// Admit a transmit request.
    ///
    /// Reserves the message length plus the tag allocation from `budget`;
    /// messages above seven bytes cannot be sent functionally.
    pub fn new(
        n_ai: NAi,
        message: &[u8],
        mtype: Mtype,
        budget: &Arc<MemoryBudget>,
        wait_frame_limit: Option<u8>,
    ) -> Result<Self, RequestError> {
        let len = message.len();
        if n_ai.is_functional() && len > MAX_SF_PAYLOAD {
            return Err(RequestError::FunctionalSegmentation { len });
        }
        if u32::try_from(len).is_err() {
            return Err(RequestError::MessageTooLong { len });
        }
        let reservation = len
            .checked_add(RUNNER_TAG_BYTES)
            .ok_or(RequestError::MessageTooLong { len })
            .and_then(|bytes| budget.reserve(bytes).map_err(|_| RequestError::OutOfMemory))?;

        let state = if len <= MAX_SF_PAYLOAD {
            SenderState::NotRunningSf
        } else {
            SenderState::NotRunningFf
        };

        Ok(Self {
            n_ai,
            mtype,
            tag: format!("Sender {}", n_ai),
            state,
            message: message.to_vec(),
            offset: 0,
            sequence_number: 1,
            block_size: 0,
            st_min: StMin::ZERO,
            frames_in_block: 0,
            wait_frames: 0,
            wait_frame_limit,
            last_cf_at: None,
            n_as: Timer::new(),
            n_bs: Timer::new(),
            n_cs: Timer::new(),
            n_cs_reported: false,
            result: None,
            _reservation: reservation,
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
    pub fn state(&self) -> SenderState {
        self.state
    }

    #[inline]
    pub fn result(&self) -> Option<NResult> {
        self.result
    }

    /// Diagnostic label, e.g. `Sender 0x18DA10F1`.
    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Message bytes already handed to the CAN layer.
    #[inline]
    pub fn bytes_sent(&self) -> usize {
        self.offset
    }

    /// Only Flow Control frames are awaited.
    pub fn awaiting_message(&self) -> bool {
        matches!(
            self.state,
            SenderState::AwaitingFirstFc | SenderState::AwaitingFc
        )
    }

    /// Earliest instant the next Consecutive Frame may go out; `None` when
    /// there is no separation time to honour.
    pub fn next_run_at(&self) -> Option<Instant> {
        match (self.state, self.last_cf_at) {
            (SenderState::SendCf, Some(last)) => Some(last + self.st_min.as_duration()),
            _ => None,
        }
    }

    pub fn step<C: CanInterface>(&mut self, frame: Option<&CanFrame>, link: &FrameLink<'_, C>) -> StepOutcome {
        if let Some(result) = self.result {
            return StepOutcome::Finished(result);
        }
        if let Some(error) = self.check_timers() {
            return self.finish(Err(error));
        }

        match self.state {
            SenderState::NotRunningSf => self.send_single_frame(link),
            SenderState::NotRunningFf => self.send_first_frame(link),
            SenderState::SendCf => self.send_consecutive_frame(link),
            SenderState::AwaitingFirstFc | SenderState::AwaitingFc => match frame {
                Some(frame) => self.handle_flow_control(frame),
                None => StepOutcome::InProgress,
            },
            SenderState::AwaitingSfAck | SenderState::AwaitingFfAck | SenderState::AwaitingCfAck => {
                StepOutcome::InProgress
            }
            SenderState::MessageSent | SenderState::Error => {
                StepOutcome::Finished(self.result.unwrap_or(Err(TransferError::Internal)))
            }
        }
    }

    pub fn on_ack(&mut self, ack: FrameAck) {
        match (self.state, ack) {
            (SenderState::MessageSent | SenderState::Error, _) => {}
            (SenderState::AwaitingSfAck, FrameAck::Success) => {
                self.n_as.stop();
                self.n_cs.clear();
                self.finish(Ok(()));
            }
            (SenderState::AwaitingFfAck, FrameAck::Success) => {
                self.n_as.stop();
                self.n_cs.clear();
                self.n_bs.start();
                self.state = SenderState::AwaitingFirstFc;
            }
            (SenderState::AwaitingCfAck, FrameAck::Success) => {
                self.n_as.stop();
                if self.offset >= self.message.len() {
                    self.finish(Ok(()));
                } else if self.block_size != 0 && self.frames_in_block >= self.block_size {
                    self.n_bs.start();
                    self.state = SenderState::AwaitingFc;
                } else {
                    self.start_n_cs();
                    self.state = SenderState::SendCf;
                }
            }
            (_state, _ack) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("{}: {} in state {}", self.n_ai, _ack, _state);
                self.finish(Err(TransferError::Internal));
            }
        }
    }

    //==================================================================================TRANSMIT
    fn send_single_frame<C: CanInterface>(&mut self, link: &FrameLink<'_, C>) -> StepOutcome {
        let Some(frame) = encode_single_frame(self.n_ai, &self.message) else {
            return self.finish(Err(TransferError::Internal));
        };
        if self.transmit(link, &frame) {
            self.offset = self.message.len();
            self.state = SenderState::AwaitingSfAck;
        }
        StepOutcome::InProgress
    }

    fn send_first_frame<C: CanInterface>(&mut self, link: &FrameLink<'_, C>) -> StepOutcome {
        let Some((frame, carried)) = encode_first_frame(self.n_ai, &self.message) else {
            return self.finish(Err(TransferError::Internal));
        };
        if self.transmit(link, &frame) {
            self.offset = carried;
            self.sequence_number = 1;
            self.state = SenderState::AwaitingFfAck;
        }
        StepOutcome::InProgress
    }

    fn send_consecutive_frame<C: CanInterface>(&mut self, link: &FrameLink<'_, C>) -> StepOutcome {
        if let Some(due) = self.next_run_at() {
            if Instant::now() < due {
                return StepOutcome::InProgress;
            }
        }
        let end = (self.offset + CF_PAYLOAD).min(self.message.len());
        let Some(frame) =
            encode_consecutive_frame(self.n_ai, self.sequence_number, &self.message[self.offset..end])
        else {
            return self.finish(Err(TransferError::Internal));
        };
        if self.transmit(link, &frame) {
            self.n_cs.stop();
            self.offset = end;
            self.sequence_number = next_sequence_number(self.sequence_number);
            self.frames_in_block = self.frames_in_block.wrapping_add(1);
            self.last_cf_at = Some(Instant::now());
            self.state = SenderState::AwaitingCfAck;
        }
        StepOutcome::InProgress
    }

    /// Write a frame under N_As supervision. A refused write is retried on the
    /// next step until N_As expires.
    fn transmit<C: CanInterface>(&mut self, link: &FrameLink<'_, C>, frame: &CanFrame) -> bool {
        if !self.n_as.is_running() {
            self.n_as.start();
        }
        link.send(frame)
    }

    //==================================================================================FLOW_CONTROL
    fn handle_flow_control(&mut self, frame: &CanFrame) -> StepOutcome {
        if frame.id.target_type() != Some(TargetAddressType::Physical)
            || frame.dlc != FC_DLC
            || PduType::of(frame) != Some(PduType::FlowControl)
        {
            return self.finish(Err(TransferError::UnexpectedPdu));
        }

        let block_size = frame.data[1];
        let st_min = StMin::from_byte(frame.data[2]);
        match FlowStatus::from_code(frame.data[0] & 0x0F) {
            Some(FlowStatus::ContinueToSend) => {
                self.n_bs.stop();
                self.block_size = block_size;
                self.st_min = st_min;
                self.frames_in_block = 0;
                self.wait_frames = 0;
                self.start_n_cs();
                self.state = SenderState::SendCf;
                StepOutcome::InProgress
            }
            Some(FlowStatus::Wait) => {
                self.wait_frames = self.wait_frames.saturating_add(1);
                if self.wait_frame_limit.is_some_and(|limit| self.wait_frames > limit) {
                    return self.finish(Err(TransferError::WaitFrameOverrun));
                }
                self.n_bs.start();
                self.state = SenderState::AwaitingFc;
                StepOutcome::InProgress
            }
            Some(FlowStatus::Overflow) if self.state == SenderState::AwaitingFirstFc => {
                self.finish(Err(TransferError::BufferOverflow))
            }
            _ => self.finish(Err(TransferError::InvalidFlowStatus)),
        }
    }

    //==================================================================================TIMERS
    fn check_timers(&mut self) -> Option<TransferError> {
        if self.n_as.exceeded(N_AS_TIMEOUT_MS) {
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: N_As expired", self.n_ai);
            return Some(TransferError::TimeoutA);
        }
        if self.n_bs.exceeded(N_BS_TIMEOUT_MS) {
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: N_Bs expired", self.n_ai);
            return Some(TransferError::TimeoutBs);
        }
        if !self.n_cs_reported && self.n_cs.exceeded(N_CS_MAX_MS) {
            self.n_cs_reported = true;
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: N_Cs performance limit exceeded", self.n_ai);
        }
        None
    }

    fn start_n_cs(&mut self) {
        self.n_cs.start();
        self.n_cs_reported = false;
    }

    fn finish(&mut self, result: NResult) -> StepOutcome {
        self.n_as.stop();
        self.n_bs.stop();
        self.n_cs.stop();
        self.state = match result {
            Ok(()) => SenderState::MessageSent,
            Err(_) => SenderState::Error,
        };
        self.result = Some(result);

        #[cfg(feature = "defmt")]
        match result {
            Ok(()) => defmt::debug!("{}: {} bytes sent", self.n_ai, self.message.len()),
            Err(e) => defmt::warn!("{}: send failed: {}", self.n_ai, e),
        }

        StepOutcome::Finished(result)
    }
}
