//! Creation and extraction of the 29-bit identifiers used by ISO 15765-2
//! normal fixed addressing (Network Address Information, N_AI).
//!
//! # Bit layout
//!
//! ```text
//! Bits 24-31 ( 8 bits) : header, always 0x18 (3 padding bits, priority 6, R = 0, DP = 0)
//! Bits 16-23 ( 8 bits) : N_TAtype (0xDA physical, 0xDB functional)
//! Bits  8-15 ( 8 bits) : N_TA, target address
//! Bits  0- 7 ( 8 bits) : N_SA, source address
//! ```
use crate::error::NAiError;
use embedded_can::{ExtendedId, Id};

/// Fixed header byte of every normal fixed addressing identifier.
pub const N_AI_HEADER: u8 = 0x18;

//==================================================================================TARGET_TYPE
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Target address type (N_TAtype) carried in the PF byte.
pub enum TargetAddressType {
    /// One-to-one communication; supports segmented messages.
    Physical,
    /// One-to-many communication; Single Frames only.
    Functional,
}

impl TargetAddressType {
    /// PF byte value.
    pub const fn code(self) -> u8 {
        match self {
            TargetAddressType::Physical => 0xDA,
            TargetAddressType::Functional => 0xDB,
        }
    }

    /// Decode a PF byte.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0xDA => Some(TargetAddressType::Physical),
            0xDB => Some(TargetAddressType::Functional),
            _ => None,
        }
    }
}

//==================================================================================N_AI
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Full 32-bit addressing identifier of a conversation.
///
/// Two runners address the same conversation iff their raw values are equal.
pub struct NAi(u32);

impl NAi {
    /// Build an identifier from its parts.
    pub const fn new(target_type: TargetAddressType, target: u8, source: u8) -> Self {
        Self(
            (N_AI_HEADER as u32) << 24
                | (target_type.code() as u32) << 16
                | (target as u32) << 8
                | source as u32,
        )
    }

    /// Physically addressed identifier.
    pub const fn physical(target: u8, source: u8) -> Self {
        Self::new(TargetAddressType::Physical, target, source)
    }

    /// Functionally addressed identifier.
    pub const fn functional(target: u8, source: u8) -> Self {
        Self::new(TargetAddressType::Functional, target, source)
    }

    /// Decode and validate a raw identifier.
    pub const fn try_from_raw(raw: u32) -> Result<Self, NAiError> {
        if (raw >> 24) as u8 != N_AI_HEADER {
            return Err(NAiError::InvalidHeader { raw });
        }
        let target_type = (raw >> 16) as u8;
        if TargetAddressType::from_code(target_type).is_none() {
            return Err(NAiError::InvalidTargetType { target_type });
        }
        Ok(Self(raw))
    }

    /// Wrap any raw identifier read from the bus; see [`is_valid`](Self::is_valid).
    #[inline]
    pub const fn from_raw_unchecked(raw: u32) -> Self {
        Self(raw)
    }

    /// Underlying `u32`.
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Header byte matches and the target type is known.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        Self::try_from_raw(self.0).is_ok()
    }

    /// N_TAtype, if the PF byte is a known value.
    #[inline]
    pub const fn target_type(&self) -> Option<TargetAddressType> {
        TargetAddressType::from_code((self.0 >> 16) as u8)
    }

    /// N_TA.
    #[inline]
    pub const fn target_address(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// N_SA.
    #[inline]
    pub const fn source_address(&self) -> u8 {
        self.0 as u8
    }

    /// Whether this identifier addresses a functional group.
    #[inline]
    pub const fn is_functional(&self) -> bool {
        matches!(self.target_type(), Some(TargetAddressType::Functional))
    }

    /// Physical identifier of the opposite direction (source and target swapped).
    ///
    /// Flow Control frames always travel physically, even for a conversation
    /// that was opened on a functional address.
    #[inline]
    pub const fn reversed(&self) -> Self {
        Self::physical(self.source_address(), self.target_address())
    }
}

impl From<NAi> for u32 {
    fn from(value: NAi) -> Self {
        value.0
    }
}

impl TryFrom<u32> for NAi {
    type Error = NAiError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::try_from_raw(raw)
    }
}

impl From<NAi> for ExtendedId {
    fn from(value: NAi) -> Self {
        // A valid N_AI is below 0x1900_0000; masking keeps invalid ones in range.
        ExtendedId::new(value.0 & ExtendedId::MAX.as_raw()).unwrap_or(ExtendedId::ZERO)
    }
}

impl From<NAi> for Id {
    fn from(value: NAi) -> Self {
        Id::Extended(value.into())
    }
}

impl core::fmt::Display for NAi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}
