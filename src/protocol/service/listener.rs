//! Notifications from the transport layer to the application.
//!
//! Three distinct points: transmit confirmation, receive indication, and the
//! early First Frame indication announcing the length of a segmented message.
use crate::core::{Mtype, NResult};
use crate::protocol::transport::n_ai::NAi;
use alloc::sync::Arc;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;

//==================================================================================LISTENER
/// Application-side receiver of service notifications.
///
/// Called from the thread driving the scheduler, with no service lock other
/// than the finished runner's own held. Implementations may call back into the
/// service (e.g. to `request` a response).
pub trait TransportListener {
    /// A transmit request finished.
    fn on_confirm(&self, n_ai: NAi, result: NResult, mtype: Mtype);

    /// A reception finished. `message` is empty unless `result` is `Ok` and is
    /// only valid for the duration of the call.
    fn on_indication(&self, n_ai: NAi, message: &[u8], result: NResult, mtype: Mtype);

    /// A First Frame announced a segmented message of `length` bytes.
    fn on_first_frame_indication(&self, n_ai: NAi, length: u32, mtype: Mtype);
}

impl<T: TransportListener + ?Sized> TransportListener for &T {
    fn on_confirm(&self, n_ai: NAi, result: NResult, mtype: Mtype) {
        (**self).on_confirm(n_ai, result, mtype)
    }

    fn on_indication(&self, n_ai: NAi, message: &[u8], result: NResult, mtype: Mtype) {
        (**self).on_indication(n_ai, message, result, mtype)
    }

    fn on_first_frame_indication(&self, n_ai: NAi, length: u32, mtype: Mtype) {
        (**self).on_first_frame_indication(n_ai, length, mtype)
    }
}

impl<T: TransportListener + ?Sized> TransportListener for Arc<T> {
    fn on_confirm(&self, n_ai: NAi, result: NResult, mtype: Mtype) {
        (**self).on_confirm(n_ai, result, mtype)
    }

    fn on_indication(&self, n_ai: NAi, message: &[u8], result: NResult, mtype: Mtype) {
        (**self).on_indication(n_ai, message, result, mtype)
    }

    fn on_first_frame_indication(&self, n_ai: NAi, length: u32, mtype: Mtype) {
        (**self).on_first_frame_indication(n_ai, length, mtype)
    }
}

//==================================================================================EVENTS
/// Owned form of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Confirm {
        n_ai: NAi,
        result: NResult,
        mtype: Mtype,
    },
    Indication {
        n_ai: NAi,
        message: Vec<u8>,
        result: NResult,
        mtype: Mtype,
    },
    FirstFrameIndication {
        n_ai: NAi,
        length: u32,
        mtype: Mtype,
    },
}

impl TransportEvent {
    /// Identifier of the conversation the event belongs to.
    pub fn n_ai(&self) -> NAi {
        match self {
            TransportEvent::Confirm { n_ai, .. }
            | TransportEvent::Indication { n_ai, .. }
            | TransportEvent::FirstFrameIndication { n_ai, .. } => *n_ai,
        }
    }
}

/// Forwards notifications into an `embassy-sync` channel.
///
/// Sending never blocks: when the channel is full the event is dropped.
pub struct ChannelListener<'a, M: RawMutex, const N: usize> {
    channel: &'a Channel<M, TransportEvent, N>,
}

impl<'a, M: RawMutex, const N: usize> ChannelListener<'a, M, N> {
    pub const fn new(channel: &'a Channel<M, TransportEvent, N>) -> Self {
        Self { channel }
    }

    fn push(&self, event: TransportEvent) {
        if let Err(_rejected) = self.channel.try_send(event) {
            #[cfg(feature = "defmt")]
            defmt::warn!("event channel full, notification dropped");
        }
    }
}

impl<M: RawMutex, const N: usize> TransportListener for ChannelListener<'_, M, N> {
    fn on_confirm(&self, n_ai: NAi, result: NResult, mtype: Mtype) {
        self.push(TransportEvent::Confirm {
            n_ai,
            result,
            mtype,
        });
    }

    fn on_indication(&self, n_ai: NAi, message: &[u8], result: NResult, mtype: Mtype) {
        self.push(TransportEvent::Indication {
            n_ai,
            message: message.to_vec(),
            result,
            mtype,
        });
    }

    fn on_first_frame_indication(&self, n_ai: NAi, length: u32, mtype: Mtype) {
        self.push(TransportEvent::FirstFrameIndication { n_ai, length, mtype });
    }
}
