//! Defines the "data contract" shared by the runners, the scheduler and the
//! application layer: message types, step outcomes and the terminal result
//! delivered through the confirm/indication callbacks.
use crate::error::TransferError;

/// Terminal result of a message exchange, as reported to the application.
///
/// `Ok(())` is the ISO 15765-2 `N_OK`; every other `N_Result` value maps to a
/// [`TransferError`] variant.
pub type NResult = Result<(), TransferError>;

/// Message type (`Mtype`) attached to each request and indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mtype {
    /// Diagnostic traffic (the only Mtype normal fixed addressing carries).
    Diagnostics,
    /// Anything the application layer did not classify.
    Unknown,
}

/// What a single runner step produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepOutcome {
    /// The exchange is still running; nothing to report.
    InProgress,
    /// A First Frame was accepted: the total message length is now known
    /// but the rest of the data has not arrived yet.
    FirstFrameReceived {
        /// Total length announced by the First Frame.
        length: u32,
    },
    /// The runner reached a terminal state; the result stays latched.
    Finished(NResult),
}

impl StepOutcome {
    /// `true` when the runner must be retired.
    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self, StepOutcome::Finished(_))
    }
}
