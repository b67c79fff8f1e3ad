//! In-memory representation of a classic CAN frame as exchanged with the
//! [`CanInterface`](crate::protocol::transport::traits::can_interface::CanInterface).
use crate::protocol::transport::n_ai::NAi;
use embedded_can::{ExtendedId, Id, StandardId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Raw frame as read from or written to the CAN bus.
pub struct CanFrame {
    /// Identifier. For ISO-TP traffic this is the full N_AI.
    pub id: NAi,
    /// Payload buffer. Classic CAN frames always provide eight bytes.
    pub data: [u8; 8],
    /// Number of valid payload bytes (Data Length Code, 0 to 8).
    pub dlc: u8,
    /// Extended (29-bit) identifier format.
    pub extended: bool,
    /// Remote transmission request.
    pub remote: bool,
}

impl CanFrame {
    /// Build an extended data frame carrying `payload` (at most eight bytes).
    pub fn new_extended(id: NAi, payload: &[u8]) -> Option<Self> {
        if payload.len() > 8 {
            return None;
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            id,
            data,
            dlc: payload.len() as u8,
            extended: true,
            remote: false,
        })
    }

    /// Valid payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.dlc.min(8))]
    }

    /// Whether the transport layer looks at this frame at all: extended data
    /// frame with a DLC in `1..=8`.
    #[inline]
    pub fn is_transport_candidate(&self) -> bool {
        self.extended && !self.remote && (1..=8).contains(&self.dlc)
    }
}

//==================================================================================EMBEDDED_CAN
impl embedded_can::Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let (raw, extended) = match id.into() {
            Id::Standard(id) => (u32::from(id.as_raw()), false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        let mut frame = CanFrame::new_extended(NAi::from_raw_unchecked(raw), data)?;
        frame.extended = extended;
        Some(frame)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        let mut frame = <Self as embedded_can::Frame>::new(id, &[])?;
        if dlc > 8 {
            return None;
        }
        frame.dlc = dlc as u8;
        frame.remote = true;
        Some(frame)
    }

    fn is_extended(&self) -> bool {
        self.extended
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        let raw = self.id.raw();
        if self.extended {
            ExtendedId::new(raw & ExtendedId::MAX.as_raw())
                .map(Id::Extended)
                .unwrap_or(Id::Extended(ExtendedId::ZERO))
        } else {
            StandardId::new((raw & 0x7FF) as u16)
                .map(Id::Standard)
                .unwrap_or(Id::Standard(StandardId::ZERO))
        }
    }

    fn dlc(&self) -> usize {
        usize::from(self.dlc)
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            self.payload()
        }
    }
}
