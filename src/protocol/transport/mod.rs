//! ISO 15765-2 transport layer: CAN frame representation, 29-bit normal fixed
//! addressing, the PDU wire codec, the CAN interface abstraction and the
//! transmit-acknowledgement pipeline.
//!
//! ## Timing Constants
//!
//! Hard ceilings terminate the exchange with a timeout result. Soft limits
//! are performance requirements: exceeding them is only logged.

pub mod ack_queue;
pub mod can_frame;
pub mod n_ai;
pub mod pdu;
pub mod traits;

/// N_As: time for the CAN layer to confirm a frame written by the sender (ms).
pub const N_AS_TIMEOUT_MS: u32 = 1000;

/// N_Ar: time for the CAN layer to confirm a frame written by the receiver (ms).
pub const N_AR_TIMEOUT_MS: u32 = 1000;

/// N_Bs: time the sender waits for a Flow Control frame (ms).
pub const N_BS_TIMEOUT_MS: u32 = 1000;

/// N_Cr: time the receiver waits for the next Consecutive Frame (ms).
pub const N_CR_TIMEOUT_MS: u32 = 1000;

/// N_Br: soft limit for the receiver to issue its next Flow Control (ms).
///
/// 90% of N_Bs so the peer never times out while we are still preparing the
/// Flow Control frame.
pub const N_BR_MAX_MS: u32 = N_BS_TIMEOUT_MS * 9 / 10;

/// N_Cs: soft limit for the sender to issue its next Consecutive Frame (ms).
///
/// 90% of N_Cr, mirroring N_Br.
pub const N_CS_MAX_MS: u32 = N_CR_TIMEOUT_MS * 9 / 10;

/// Minimum spacing between two scheduler ticks (ms).
///
/// The scheduler is a coarse polling loop; the acknowledgement queue runs at
/// its own, finer cadence ([`ACK_RUN_PERIOD_MS`]).
pub const DOCAN_RUN_PERIOD_MS: u32 = 100;

/// Cadence of the acknowledgement queue when driven by the async driver (ms).
pub const ACK_RUN_PERIOD_MS: u32 = 1;

/// How long the entry of a retired runner keeps waiting for its transmission
/// outcome before it is dropped (ms).
pub const ACK_DETACHED_TTL_MS: u32 = N_AS_TIMEOUT_MS;

/// Bound applied to every internal lock acquisition (ms).
pub const LOCK_TIMEOUT_MS: u32 = 100;

/// Bytes every runner reserves up front for its diagnostic tag.
pub const RUNNER_TAG_BYTES: usize = 32;

/// Largest payload a Single Frame carries with classic CAN.
pub const MAX_SF_PAYLOAD: usize = 7;

/// Largest message length a First Frame can announce without the escape sequence.
pub const MAX_FF_DL_12BIT: usize = 0x0FFF;
