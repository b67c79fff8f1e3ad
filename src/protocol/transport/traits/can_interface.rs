//! Minimal abstraction for a polled CAN controller. Allows the transport
//! layer to plug into various implementations (embedded HAL, SocketCAN
//! wrapper, simulated bus, etc.).
//!
//! Methods take `&self`: the scheduler and the acknowledgement queue may poll
//! the same interface from different threads, so implementations synchronize
//! internally.
use crate::protocol::transport::can_frame::CanFrame;

/// Outcome of one frame transmission as reported by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameAck {
    /// The frame was transmitted and acknowledged on the bus.
    Success,
    /// The controller gave up on the frame (bus error, arbitration loss limit...).
    Error,
}

/// Contract to exchange CAN frames by polling.
pub trait CanInterface {
    type Error: core::fmt::Debug;

    /// Number of received frames waiting to be read.
    fn frame_available(&self) -> usize;

    /// Pop the oldest received frame, if any.
    fn read_frame(&self) -> Option<CanFrame>;

    /// Queue a frame for transmission. `Ok` only means the controller took it;
    /// the transmission outcome is reported later by [`write_frame_ack`](Self::write_frame_ack).
    fn write_frame(&self, frame: &CanFrame) -> Result<(), Self::Error>;

    /// Whether the controller is on the bus and able to exchange frames.
    fn active(&self) -> bool;

    /// Oldest transmission outcome not reported yet, `None` when there is no
    /// new outcome since the previous call. Outcomes come in write order.
    fn write_frame_ack(&self) -> Option<FrameAck>;
}

impl<T: CanInterface + ?Sized> CanInterface for &T {
    type Error = T::Error;

    fn frame_available(&self) -> usize {
        (**self).frame_available()
    }

    fn read_frame(&self) -> Option<CanFrame> {
        (**self).read_frame()
    }

    fn write_frame(&self, frame: &CanFrame) -> Result<(), Self::Error> {
        (**self).write_frame(frame)
    }

    fn active(&self) -> bool {
        (**self).active()
    }

    fn write_frame_ack(&self) -> Option<FrameAck> {
        (**self).write_frame_ack()
    }
}

impl<T: CanInterface + ?Sized> CanInterface for alloc::sync::Arc<T> {
    type Error = T::Error;

    fn frame_available(&self) -> usize {
        (**self).frame_available()
    }

    fn read_frame(&self) -> Option<CanFrame> {
        (**self).read_frame()
    }

    fn write_frame(&self, frame: &CanFrame) -> Result<(), Self::Error> {
        (**self).write_frame(frame)
    }

    fn active(&self) -> bool {
        (**self).active()
    }

    fn write_frame_ack(&self) -> Option<FrameAck> {
        (**self).write_frame_ack()
    }
}
