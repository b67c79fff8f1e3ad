//! ISO 15765-2 protocol data unit codec for classic CAN (8-byte frames).
//!
//! Byte 0 of every frame is the Protocol Control Information (PCI); its high
//! nibble selects the PDU type.
//!
//! ```text
//! SF : 0x0L                      L = length (0..=7), payload follows
//! FF : 0x1H LL                   12-bit length, payload follows (6 bytes)
//! FF : 0x10 00 XX XX XX XX       escape sequence, 32-bit big-endian length, payload follows (2 bytes)
//! CF : 0x2N                      N = sequence number, payload follows (<= 7 bytes)
//! FC : 0x3S BS ST                S = flow status, BS = block size, ST = STmin code
//! ```
use crate::error::ConfigError;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::n_ai::NAi;
use crate::protocol::transport::{MAX_FF_DL_12BIT, MAX_SF_PAYLOAD};
use embassy_time::Duration;

/// Payload bytes carried by a First Frame with a 12-bit length.
pub const FF_PAYLOAD: usize = 6;
/// Payload bytes carried by a First Frame using the escape sequence.
pub const FF_ESCAPE_PAYLOAD: usize = 2;
/// Payload bytes carried by a full Consecutive Frame.
pub const CF_PAYLOAD: usize = 7;
/// DLC of a Flow Control frame.
pub const FC_DLC: u8 = 3;

//==================================================================================PDU_TYPE
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// PDU type selected by the PCI high nibble.
pub enum PduType {
    SingleFrame,
    FirstFrame,
    ConsecutiveFrame,
    FlowControl,
}

impl PduType {
    /// Decode the PCI byte.
    pub const fn from_pci(pci: u8) -> Option<Self> {
        match pci >> 4 {
            0x0 => Some(PduType::SingleFrame),
            0x1 => Some(PduType::FirstFrame),
            0x2 => Some(PduType::ConsecutiveFrame),
            0x3 => Some(PduType::FlowControl),
            _ => None,
        }
    }

    /// PDU type of a frame, `None` for an empty or unknown one.
    pub fn of(frame: &CanFrame) -> Option<Self> {
        frame.payload().first().and_then(|pci| Self::from_pci(*pci))
    }

    /// PCI high nibble, shifted in place.
    pub const fn pci(self) -> u8 {
        match self {
            PduType::SingleFrame => 0x00,
            PduType::FirstFrame => 0x10,
            PduType::ConsecutiveFrame => 0x20,
            PduType::FlowControl => 0x30,
        }
    }
}

//==================================================================================FLOW_STATUS
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Flow status of a Flow Control frame.
pub enum FlowStatus {
    ContinueToSend,
    Wait,
    Overflow,
}

impl FlowStatus {
    /// Low nibble value.
    pub const fn code(self) -> u8 {
        match self {
            FlowStatus::ContinueToSend => 0,
            FlowStatus::Wait => 1,
            FlowStatus::Overflow => 2,
        }
    }

    /// Decode the low nibble; reserved values yield `None`.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FlowStatus::ContinueToSend),
            1 => Some(FlowStatus::Wait),
            2 => Some(FlowStatus::Overflow),
            _ => None,
        }
    }
}

//==================================================================================ST_MIN
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Unit of a separation time value.
pub enum StMinUnit {
    /// 0..=127 milliseconds.
    Millis,
    /// 1..=9 hundreds of microseconds.
    HundredMicros,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Minimum separation time between two Consecutive Frames.
pub struct StMin {
    pub value: u8,
    pub unit: StMinUnit,
}

impl Default for StMin {
    fn default() -> Self {
        Self::ZERO
    }
}

impl StMin {
    /// No separation time.
    pub const ZERO: StMin = StMin::millis(0);
    /// Largest encodable value; also the fallback for reserved codes.
    pub const MAX: StMin = StMin::millis(127);

    /// Millisecond separation time (not validated).
    pub const fn millis(value: u8) -> Self {
        Self {
            value,
            unit: StMinUnit::Millis,
        }
    }

    /// Hundred-microsecond separation time (not validated).
    pub const fn hundred_micros(value: u8) -> Self {
        Self {
            value,
            unit: StMinUnit::HundredMicros,
        }
    }

    /// Range check: 0..=127 ms or 1..=9 × 100 µs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = match self.unit {
            StMinUnit::Millis => self.value <= 127,
            StMinUnit::HundredMicros => (1..=9).contains(&self.value),
        };
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidStMin {
                value: self.value,
                unit: self.unit,
            })
        }
    }

    /// Decode an STmin byte. Reserved codes are read as the maximum (127 ms).
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00..=0x7F => Self::millis(byte),
            0xF1..=0xF9 => Self::hundred_micros(byte & 0x0F),
            _ => Self::MAX,
        }
    }

    /// Encode to an STmin byte. Out-of-range values encode as the maximum.
    pub fn to_byte(&self) -> u8 {
        match self.unit {
            StMinUnit::Millis if self.value <= 127 => self.value,
            StMinUnit::HundredMicros if (1..=9).contains(&self.value) => 0xF0 | self.value,
            _ => Self::MAX.value,
        }
    }

    /// Separation time as a duration.
    pub fn as_duration(&self) -> Duration {
        match self.unit {
            StMinUnit::Millis => Duration::from_millis(u64::from(self.value)),
            StMinUnit::HundredMicros => Duration::from_micros(u64::from(self.value) * 100),
        }
    }
}

//==================================================================================ENCODERS
/// Single Frame carrying `payload` (at most seven bytes).
pub fn encode_single_frame(id: NAi, payload: &[u8]) -> Option<CanFrame> {
    if payload.len() > MAX_SF_PAYLOAD {
        return None;
    }
    let mut data = [0u8; 8];
    data[0] = PduType::SingleFrame.pci() | payload.len() as u8;
    data[1..1 + payload.len()].copy_from_slice(payload);
    CanFrame::new_extended(id, &data[..1 + payload.len()])
}

/// First Frame announcing `message.len()` bytes.
///
/// Returns the frame and the number of message bytes it carries. Lengths above
/// 4095 use the escape sequence.
pub fn encode_first_frame(id: NAi, message: &[u8]) -> Option<(CanFrame, usize)> {
    let total = message.len();
    if total <= MAX_SF_PAYLOAD {
        return None;
    }
    let mut data = [0u8; 8];
    let carried = if total <= MAX_FF_DL_12BIT {
        data[0] = PduType::FirstFrame.pci() | ((total >> 8) & 0x0F) as u8;
        data[1] = (total & 0xFF) as u8;
        data[2..8].copy_from_slice(&message[..FF_PAYLOAD]);
        FF_PAYLOAD
    } else {
        let total = u32::try_from(total).ok()?;
        data[0] = PduType::FirstFrame.pci();
        data[1] = 0x00;
        data[2..6].copy_from_slice(&total.to_be_bytes());
        data[6..8].copy_from_slice(&message[..FF_ESCAPE_PAYLOAD]);
        FF_ESCAPE_PAYLOAD
    };
    Some((CanFrame::new_extended(id, &data)?, carried))
}

/// Consecutive Frame with sequence number `sn` (low nibble) carrying `chunk`.
pub fn encode_consecutive_frame(id: NAi, sn: u8, chunk: &[u8]) -> Option<CanFrame> {
    if chunk.len() > CF_PAYLOAD {
        return None;
    }
    let mut data = [0u8; 8];
    data[0] = PduType::ConsecutiveFrame.pci() | (sn & 0x0F);
    data[1..1 + chunk.len()].copy_from_slice(chunk);
    CanFrame::new_extended(id, &data[..1 + chunk.len()])
}

/// Flow Control frame.
pub fn encode_flow_control(id: NAi, status: FlowStatus, block_size: u8, st_min: StMin) -> CanFrame {
    CanFrame {
        id,
        data: [
            PduType::FlowControl.pci() | status.code(),
            block_size,
            st_min.to_byte(),
            0,
            0,
            0,
            0,
            0,
        ],
        dlc: FC_DLC,
        extended: true,
        remote: false,
    }
}

//==================================================================================DECODERS
/// Length announced by a First Frame and the offset of its first payload byte.
///
/// A zero 12-bit length selects the escape sequence: the length is then the
/// 32-bit big-endian value in bytes 2..6.
pub fn decode_first_frame_length(payload: &[u8]) -> Option<(u32, usize)> {
    if payload.len() < 2 {
        return None;
    }
    let short = (u32::from(payload[0] & 0x0F) << 8) | u32::from(payload[1]);
    if short != 0 {
        return Some((short, 2));
    }
    let escaped = payload.get(2..6)?;
    let length = u32::from_be_bytes([escaped[0], escaped[1], escaped[2], escaped[3]]);
    Some((length, 6))
}

/// Next sequence number: 1, 2, ..., 15, 0, 1, ...
#[inline]
pub const fn next_sequence_number(sn: u8) -> u8 {
    sn.wrapping_add(1) & 0x0F
}
