//! Receiving side of one ISO 15765-2 exchange.
//!
//! ```text
//! NOT_RUNNING --SF--> MESSAGE_RECEIVED
//! NOT_RUNNING --FF--> SEND_FC --FC--> AWAITING_FC_ACK --ack--> AWAITING_CF
//! AWAITING_CF --CF--> AWAITING_CF | SEND_FC (block done) | MESSAGE_RECEIVED
//! ```
//! A Consecutive Frame may overtake the acknowledgement of our own Flow
//! Control; it is held in `AWAITING_FC_ACK` and replayed once the
//! acknowledgement arrives.
use crate::core::{Mtype, NResult, StepOutcome};
use crate::error::{BudgetError, TransferError};
use crate::infra::budget::{MemoryBudget, Reservation};
use crate::infra::timer::Timer;
use crate::protocol::runner::FrameLink;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::n_ai::NAi;
use crate::protocol::transport::pdu::{
    decode_first_frame_length, encode_flow_control, next_sequence_number, FlowStatus, PduType,
    StMin,
};
use crate::protocol::transport::traits::can_interface::{CanInterface, FrameAck};
use crate::protocol::transport::{
    MAX_SF_PAYLOAD, N_AR_TIMEOUT_MS, N_BR_MAX_MS, N_CR_TIMEOUT_MS, RUNNER_TAG_BYTES,
};
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

//==================================================================================RECEIVER_STATE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiverState {
    NotRunning,
    SendFc,
    AwaitingFcAck,
    AwaitingCf,
    MessageReceived,
    Error,
}

//==================================================================================RECEIVER_RUNNER
/// Reassembles one inbound message.
#[derive(Debug)]
pub struct ReceiverRunner {
    n_ai: NAi,
    tag: String,
    state: ReceiverState,
    budget: Arc<MemoryBudget>,
    buffer: Vec<u8>,
    expected_length: usize,
    offset: usize,
    sequence_number: u8,
    block_size: u8,
    st_min: StMin,
    sent_block_size: u8,
    sent_st_min: StMin,
    frames_in_block: u8,
    held_frame: Option<CanFrame>,
    n_ar: Timer,
    n_br: Timer,
    n_cr: Timer,
    n_br_reported: bool,
    result: Option<NResult>,
    _buffer_reservation: Option<Reservation>,
    _tag_reservation: Reservation,
}

impl ReceiverRunner {
    /// Create a receiver for frames arriving on `n_ai`.
    ///
    /// Only the tag allocation is reserved here; the message buffer is
    /// reserved when the first PDU announces its length.
    pub fn new(
        n_ai: NAi,
        budget: &Arc<MemoryBudget>,
        block_size: u8,
        st_min: StMin,
    ) -> Result<Self, BudgetError> {
        let tag_reservation = budget.reserve(RUNNER_TAG_BYTES)?;
        Ok(Self {
            n_ai,
            tag: format!("Receiver {}", n_ai),
            state: ReceiverState::NotRunning,
            budget: Arc::clone(budget),
            buffer: Vec::new(),
            expected_length: 0,
            offset: 0,
            sequence_number: 1,
            block_size,
            st_min,
            sent_block_size: block_size,
            sent_st_min: st_min,
            frames_in_block: 0,
            held_frame: None,
            n_ar: Timer::new(),
            n_br: Timer::new(),
            n_cr: Timer::new(),
            n_br_reported: false,
            result: None,
            _buffer_reservation: None,
            _tag_reservation: tag_reservation,
        })
    }

    #[inline]
    pub fn n_ai(&self) -> NAi {
        self.n_ai
    }

    /// Normal fixed addressing only carries diagnostics.
    #[inline]
    pub fn mtype(&self) -> Mtype {
        Mtype::Diagnostics
    }

    #[inline]
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    #[inline]
    pub fn result(&self) -> Option<NResult> {
        self.result
    }

    #[inline]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Length announced by the first PDU (zero before it arrived).
    #[inline]
    pub fn expected_length(&self) -> usize {
        self.expected_length
    }

    /// The reassembled message once complete, empty otherwise.
    pub fn message(&self) -> &[u8] {
        match self.result {
            Some(Ok(())) => &self.buffer[..self.expected_length],
            _ => &[],
        }
    }

    /// Block size configured for the next Flow Control.
    #[inline]
    pub fn block_size(&self) -> u8 {
        self.block_size
    }

    /// STmin configured for the next Flow Control.
    #[inline]
    pub fn st_min(&self) -> StMin {
        self.st_min
    }

    /// Block size announced in the last Flow Control sent; governs the current block.
    #[inline]
    pub fn effective_block_size(&self) -> u8 {
        self.sent_block_size
    }

    /// STmin announced in the last Flow Control sent.
    #[inline]
    pub fn effective_st_min(&self) -> StMin {
        self.sent_st_min
    }

    /// Takes effect at the next Flow Control.
    pub fn set_block_size(&mut self, block_size: u8) {
        self.block_size = block_size;
    }

    /// Takes effect at the next Flow Control.
    pub fn set_st_min(&mut self, st_min: StMin) {
        self.st_min = st_min;
    }

    /// Consecutive Frames are awaited, including while our Flow Control is
    /// still unacknowledged.
    pub fn awaiting_message(&self) -> bool {
        matches!(
            self.state,
            ReceiverState::AwaitingCf | ReceiverState::AwaitingFcAck
        )
    }

    pub fn step<C: CanInterface>(&mut self, frame: Option<&CanFrame>, link: &FrameLink<'_, C>) -> StepOutcome {
        if let Some(result) = self.result {
            return StepOutcome::Finished(result);
        }
        if let Some(error) = self.check_timers() {
            return self.finish(Err(error));
        }

        match self.state {
            ReceiverState::NotRunning => match frame {
                Some(frame) => self.handle_first_pdu(frame, link),
                None => self.finish(Err(TransferError::Internal)),
            },
            ReceiverState::SendFc => self.send_flow_control(link),
            ReceiverState::AwaitingFcAck => {
                if let Some(frame) = frame {
                    if self.held_frame.is_none() {
                        self.held_frame = Some(*frame);
                    } else {
                        #[cfg(feature = "defmt")]
                        defmt::warn!("{}: frame dropped while awaiting FC ack", self.n_ai);
                    }
                }
                StepOutcome::InProgress
            }
            ReceiverState::AwaitingCf => match frame {
                Some(frame) => self.handle_consecutive_frame(frame),
                None => StepOutcome::InProgress,
            },
            ReceiverState::MessageReceived | ReceiverState::Error => {
                StepOutcome::Finished(self.result.unwrap_or(Err(TransferError::Internal)))
            }
        }
    }

    pub fn on_ack(&mut self, ack: FrameAck) {
        match (self.state, ack) {
            (ReceiverState::AwaitingFcAck, FrameAck::Success) => {
                self.n_ar.stop();
                self.n_br.clear();
                self.n_cr.start();
                self.state = ReceiverState::AwaitingCf;
                if let Some(frame) = self.held_frame.take() {
                    self.handle_consecutive_frame(&frame);
                }
            }
            (ReceiverState::MessageReceived | ReceiverState::Error, _) => {}
            (_, FrameAck::Error) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("{}: flow control transmission failed", self.n_ai);
                self.finish(Err(TransferError::Internal));
            }
            (_, FrameAck::Success) => {}
        }
    }

    //==================================================================================FIRST_PDU
    fn handle_first_pdu<C: CanInterface>(&mut self, frame: &CanFrame, link: &FrameLink<'_, C>) -> StepOutcome {
        match PduType::of(frame) {
            Some(PduType::SingleFrame) => self.handle_single_frame(frame),
            Some(PduType::FirstFrame) => self.handle_first_frame(frame, link),
            _ => self.finish(Err(TransferError::UnexpectedPdu)),
        }
    }

    fn handle_single_frame(&mut self, frame: &CanFrame) -> StepOutcome {
        let payload = frame.payload();
        let length = usize::from(payload[0] & 0x0F);
        if length > MAX_SF_PAYLOAD || length + 1 > payload.len() {
            return self.finish(Err(TransferError::UnexpectedPdu));
        }
        if self.reserve_buffer(length).is_err() {
            return self.finish(Err(TransferError::BufferOverflow));
        }
        self.buffer.extend_from_slice(&payload[1..1 + length]);
        self.offset = length;
        self.finish(Ok(()))
    }

    fn handle_first_frame<C: CanInterface>(&mut self, frame: &CanFrame, link: &FrameLink<'_, C>) -> StepOutcome {
        if self.n_ai.is_functional() || frame.dlc != 8 {
            return self.finish(Err(TransferError::UnexpectedPdu));
        }
        let payload = frame.payload();
        let Some((announced, header_len)) = decode_first_frame_length(payload) else {
            return self.finish(Err(TransferError::UnexpectedPdu));
        };
        let Ok(length) = usize::try_from(announced) else {
            return self.reject_first_frame(link);
        };
        if length <= MAX_SF_PAYLOAD {
            return self.finish(Err(TransferError::UnexpectedPdu));
        }
        if self.reserve_buffer(length).is_err() {
            return self.reject_first_frame(link);
        }

        let carried = (payload.len() - header_len).min(length);
        self.buffer = vec![0; length];
        self.buffer[..carried].copy_from_slice(&payload[header_len..header_len + carried]);
        self.offset = carried;
        self.sequence_number = 1;
        self.n_br.start();
        self.n_br_reported = false;
        self.state = ReceiverState::SendFc;

        #[cfg(feature = "defmt")]
        defmt::debug!("{}: first frame announces {} bytes", self.n_ai, announced);

        StepOutcome::FirstFrameReceived { length: announced }
    }

    /// Answer an unaffordable First Frame with an Overflow Flow Control.
    fn reject_first_frame<C: CanInterface>(&mut self, link: &FrameLink<'_, C>) -> StepOutcome {
        let overflow = encode_flow_control(self.n_ai.reversed(), FlowStatus::Overflow, 0, StMin::ZERO);
        if !link.send(&overflow) {
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: overflow flow control not written", self.n_ai);
        }
        self.finish(Err(TransferError::BufferOverflow))
    }

    fn reserve_buffer(&mut self, length: usize) -> Result<(), BudgetError> {
        let reservation = self.budget.reserve(length)?;
        self.expected_length = length;
        self._buffer_reservation = Some(reservation);
        Ok(())
    }

    //==================================================================================FLOW_CONTROL
    fn send_flow_control<C: CanInterface>(&mut self, link: &FrameLink<'_, C>) -> StepOutcome {
        self.n_br.stop();
        if !self.n_ar.is_running() {
            self.n_ar.start();
        }
        let frame = encode_flow_control(
            self.n_ai.reversed(),
            FlowStatus::ContinueToSend,
            self.block_size,
            self.st_min,
        );
        if link.send(&frame) {
            self.sent_block_size = self.block_size;
            self.sent_st_min = self.st_min;
            self.frames_in_block = 0;
            self.state = ReceiverState::AwaitingFcAck;
        }
        StepOutcome::InProgress
    }

    //==================================================================================CONSECUTIVE_FRAME
    fn handle_consecutive_frame(&mut self, frame: &CanFrame) -> StepOutcome {
        if PduType::of(frame) != Some(PduType::ConsecutiveFrame) {
            return self.finish(Err(TransferError::UnexpectedPdu));
        }
        let payload = frame.payload();
        let sequence_number = payload[0] & 0x0F;
        if sequence_number != self.sequence_number {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "{}: expected SN {}, got {}",
                self.n_ai,
                self.sequence_number,
                sequence_number
            );
            return self.finish(Err(TransferError::WrongSequenceNumber));
        }

        let count = (payload.len() - 1).min(self.expected_length - self.offset);
        self.buffer[self.offset..self.offset + count].copy_from_slice(&payload[1..1 + count]);
        self.offset += count;
        self.sequence_number = next_sequence_number(sequence_number);
        self.frames_in_block = self.frames_in_block.wrapping_add(1);

        if self.offset >= self.expected_length {
            self.n_cr.stop();
            return self.finish(Ok(()));
        }
        if self.sent_block_size != 0 && self.frames_in_block >= self.sent_block_size {
            self.n_cr.stop();
            self.n_br.start();
            self.n_br_reported = false;
            self.state = ReceiverState::SendFc;
        } else {
            self.n_cr.start();
        }
        StepOutcome::InProgress
    }

    //==================================================================================TIMERS
    fn check_timers(&mut self) -> Option<TransferError> {
        if self.n_ar.exceeded(N_AR_TIMEOUT_MS) {
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: N_Ar expired", self.n_ai);
            return Some(TransferError::TimeoutA);
        }
        if self.n_cr.exceeded(N_CR_TIMEOUT_MS) {
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: N_Cr expired", self.n_ai);
            return Some(TransferError::TimeoutCr);
        }
        if !self.n_br_reported && self.n_br.exceeded(N_BR_MAX_MS) {
            self.n_br_reported = true;
            #[cfg(feature = "defmt")]
            defmt::warn!("{}: N_Br performance limit exceeded", self.n_ai);
        }
        None
    }

    fn finish(&mut self, result: NResult) -> StepOutcome {
        self.n_ar.stop();
        self.n_br.stop();
        self.n_cr.stop();
        self.held_frame = None;
        self.state = match result {
            Ok(()) => ReceiverState::MessageReceived,
            Err(_) => ReceiverState::Error,
        };
        self.result = Some(result);

        #[cfg(feature = "defmt")]
        match result {
            Ok(()) => defmt::debug!("{}: {} bytes received", self.n_ai, self.expected_length),
            Err(e) => defmt::warn!("{}: reception failed: {}", self.n_ai, e),
        }

        StepOutcome::Finished(result)
    }
}
