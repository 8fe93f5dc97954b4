//! DNS message parsing and construction.
//!
//! [`wire`] holds the bounds-checked codec, [`message`] the in-memory model
//! and the mutations used to answer a query locally.

pub mod message;
pub mod wire;

use std::fmt;

pub use message::{Header, Message, Question, ResourceRecord};
pub use wire::{HEADER_LEN, MAX_NAME_LEN, MAX_PACKET_SIZE, decode, encode};

/// Default DNS port.
pub const DNS_PORT: u16 = 53;

/// Class IN.
pub const CLASS_IN: u16 = 1;

/// TTL in seconds put on every locally synthesized answer.
pub const ANSWER_TTL: u32 = 128;

/// DNS record types we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    HTTPS,
    ANY,
    Other(u16),
}

impl RecordType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            65 => RecordType::HTTPS,
            255 => RecordType::ANY,
            other => RecordType::Other(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::HTTPS => 65,
            RecordType::ANY => 255,
            RecordType::Other(v) => v,
        }
    }

    /// Whether queries of this type are candidates for capture or blocking.
    pub fn is_address(self) -> bool {
        matches!(self, RecordType::A | RecordType::AAAA)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::HTTPS => write!(f, "HTTPS"),
            RecordType::ANY => write!(f, "ANY"),
            RecordType::Other(v) => write!(f, "TYPE{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_conversions_are_symmetric() {
        for value in [1u16, 2, 5, 6, 12, 15, 16, 28, 33, 65, 255, 99] {
            assert_eq!(RecordType::from_u16(value).to_u16(), value);
        }
    }

    #[test]
    fn only_a_and_aaaa_are_address_types() {
        assert!(RecordType::A.is_address());
        assert!(RecordType::AAAA.is_address());
        assert!(!RecordType::MX.is_address());
        assert!(!RecordType::Other(4242).is_address());
    }

    #[test]
    fn unknown_types_display_numerically() {
        assert_eq!(RecordType::Other(99).to_string(), "TYPE99");
        assert_eq!(RecordType::AAAA.to_string(), "AAAA");
    }
}
