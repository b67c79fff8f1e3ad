//! Error definitions shared across library modules.
//! Each type models a specific failure scenario (protocol result, admission,
//! configuration, identifier decoding, lock acquisition).
use crate::protocol::transport::pdu::StMinUnit;
use thiserror_no_std::Error;

//==================================================================================TRANSFER_ERROR
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Terminal failure of a message exchange (the non-`N_OK` values of `N_Result`).
pub enum TransferError {
    /// A written frame was not acknowledged by the CAN layer within N_As / N_Ar.
    #[error("N_TIMEOUT_A: frame transmission not confirmed in time")]
    TimeoutA,
    /// No Flow Control frame arrived within N_Bs.
    #[error("N_TIMEOUT_Bs: flow control not received in time")]
    TimeoutBs,
    /// No Consecutive Frame arrived within N_Cr.
    #[error("N_TIMEOUT_Cr: consecutive frame not received in time")]
    TimeoutCr,
    /// A Consecutive Frame carried an unexpected sequence number.
    #[error("N_WRONG_SN: unexpected sequence number")]
    WrongSequenceNumber,
    /// A Flow Control frame carried an invalid or misplaced flow status.
    #[error("N_INVALID_FS: invalid flow status")]
    InvalidFlowStatus,
    /// A frame of the wrong PDU type (or malformed) arrived.
    #[error("N_UNEXP_PDU: unexpected protocol data unit")]
    UnexpectedPdu,
    /// The peer answered with more WAIT flow controls than allowed.
    #[error("N_WFT_OVRN: too many wait flow controls")]
    WaitFrameOverrun,
    /// The announced message does not fit: either the peer reported an
    /// overflow on the first Flow Control, or the local budget is exhausted.
    #[error("N_BUFFER_OVFLW: message does not fit in the receive buffer")]
    BufferOverflow,
    /// Catch-all for local failures (lock timeout, CAN write refused, bad state).
    #[error("N_ERROR: internal error")]
    Internal,
}

//==================================================================================LOCKS
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// A bounded-wait lock could not be acquired before its deadline.
#[error("Lock acquisition timed out")]
pub struct LockTimeout;

//==================================================================================BUDGET
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Failures of the shared memory budget.
pub enum BudgetError {
    /// Not enough bytes left to honour the reservation; nothing was reserved.
    #[error("Memory budget exhausted -> requested: {requested}, available: {available}")]
    Exhausted { requested: usize, available: i64 },
}

//==================================================================================REQUEST
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Reasons a transmit request is rejected synchronously.
pub enum RequestError {
    /// The shared memory budget cannot hold the message.
    #[error("Insufficient memory budget for the message")]
    OutOfMemory,
    /// Functional addressing only carries Single Frames (at most seven bytes).
    #[error("Functional addressing cannot carry {len} bytes (segmentation forbidden)")]
    FunctionalSegmentation { len: usize },
    /// The message length cannot be expressed in a First Frame.
    #[error("Message too long: {len} bytes")]
    MessageTooLong { len: usize },
    /// Internal lock not acquired in time.
    #[error(transparent)]
    Lock(#[from] LockTimeout),
}

//==================================================================================CONFIG
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Configuration changes refused by the service.
pub enum ConfigError {
    /// STmin value outside 0..=127 ms or 1..=9 hundred-microseconds.
    #[error("Invalid STmin {value} ({unit:?})")]
    InvalidStMin { value: u8, unit: StMinUnit },
    /// Internal lock not acquired in time.
    #[error(transparent)]
    Lock(#[from] LockTimeout),
}

//==================================================================================N_AI
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Errors raised while decoding a raw 29-bit identifier into an `NAi`.
pub enum NAiError {
    /// Priority / padding bits differ from the normal fixed addressing header.
    #[error("Invalid N_AI header in {raw:#010x}")]
    InvalidHeader { raw: u32 },
    /// The PF byte is neither the physical nor the functional target type.
    #[error("Invalid target address type {target_type:#04x}")]
    InvalidTargetType { target_type: u8 },
}
