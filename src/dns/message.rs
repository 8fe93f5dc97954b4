//! In-memory DNS message and the mutations used to answer locally.

use std::net::IpAddr;

use crate::error::{AnswerError, WireError};

use super::{ANSWER_TTL, CLASS_IN, HEADER_LEN, MAX_NAME_LEN, RecordType};

/// Longest literal label.
const MAX_LABEL_LEN: usize = 63;

/// Compression pointer to offset 12, i.e. the question name.
const QNAME_POINTER: [u8; 2] = [0xC0, 0x0C];

/// The fixed 12 byte message header, flags unpacked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    /// Set on responses.
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    /// Reserved bits (including AD/CD), carried through untouched.
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    /// Unpack the 16 bit flags word.
    pub fn from_flags(id: u16, flags: u16) -> Self {
        Self {
            id,
            qr: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0x0F) as u8,
            aa: flags & 0x0400 != 0,
            tc: flags & 0x0200 != 0,
            rd: flags & 0x0100 != 0,
            ra: flags & 0x0080 != 0,
            z: ((flags >> 4) & 0x07) as u8,
            rcode: (flags & 0x0F) as u8,
            ..Self::default()
        }
    }

    /// Pack the flags back into wire order.
    pub fn flags(&self) -> u16 {
        (self.qr as u16) << 15
            | (self.opcode as u16 & 0x0F) << 11
            | (self.aa as u16) << 10
            | (self.tc as u16) << 9
            | (self.rd as u16) << 8
            | (self.ra as u16) << 7
            | (self.z as u16 & 0x07) << 4
            | (self.rcode as u16 & 0x0F)
    }
}

/// The single question of a message. `qname` is kept in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: Vec<u8>,
    pub qtype: u16,
    pub qclass: u16,
}

/// A resource record. `name` is kept in wire form and may end in an
/// unresolved compression pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Vec<u8>,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl ResourceRecord {
    fn wire_len(&self) -> usize {
        self.name.len() + 10 + self.rdata.len()
    }
}

/// A DNS message: header, exactly one question, and the answer, authority
/// and additional records concatenated in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub question: Question,
    pub records: Vec<ResourceRecord>,
}

impl Message {
    /// Build a recursion-desired query for `domain`.
    pub fn query(id: u16, domain: &str, qtype: RecordType) -> Result<Self, WireError> {
        let mut qname = Vec::with_capacity(domain.len() + 2);
        for label in domain.split('.').filter(|l| !l.is_empty()) {
            if label.len() > MAX_LABEL_LEN {
                return Err(WireError::LabelTooLong(label.len()));
            }
            qname.push(label.len() as u8);
            qname.extend_from_slice(label.as_bytes());
        }
        qname.push(0);
        if qname.len() > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(qname.len()));
        }

        Ok(Self {
            header: Header {
                id,
                rd: true,
                qdcount: 1,
                ..Header::default()
            },
            question: Question {
                qname,
                qtype: qtype.to_u16(),
                qclass: CLASS_IN,
            },
            records: Vec::new(),
        })
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    pub fn is_response(&self) -> bool {
        self.header.qr
    }

    pub fn qtype(&self) -> RecordType {
        RecordType::from_u16(self.question.qtype)
    }

    /// Number of bytes [`encode`](super::encode) will produce.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN
            + self.question.qname.len()
            + 4
            + self.records.iter().map(ResourceRecord::wire_len).sum::<usize>()
    }

    /// The question name as a dotted string, e.g. `ads.example.com`.
    ///
    /// Pointers are not followed: a name that starts with one yields an
    /// empty string, and labels before a pointer yield just that prefix.
    pub fn domain_string(&self) -> String {
        let name = &self.question.qname;
        let mut domain = String::with_capacity(name.len());
        let mut pos = 0;

        while let Some(&len) = name.get(pos) {
            if len == 0 || len & 0xC0 != 0 {
                break;
            }
            let start = pos + 1;
            let end = (start + len as usize).min(name.len());
            if !domain.is_empty() {
                domain.push('.');
            }
            domain.push_str(&String::from_utf8_lossy(&name[start..end]));
            pos = end;
        }

        domain
    }

    /// Turn this query into an authoritative answer carrying `address`.
    ///
    /// The record type follows the question: A questions take an IPv4
    /// literal, AAAA questions an IPv6 one. Any existing records are
    /// replaced. On error the message is left untouched.
    pub fn synthesize_answer(&mut self, address: &str) -> Result<(), AnswerError> {
        let expected = match self.qtype() {
            RecordType::A => "IPv4",
            RecordType::AAAA => "IPv6",
            other => return Err(AnswerError::UnsupportedType(other.to_u16())),
        };
        let ip = address
            .parse::<IpAddr>()
            .map_err(|_| AnswerError::InvalidAddress {
                literal: address.to_string(),
            })?;

        let rdata = match (self.qtype(), ip) {
            (RecordType::A, IpAddr::V4(v4)) => v4.octets().to_vec(),
            (RecordType::AAAA, IpAddr::V6(v6)) => v6.octets().to_vec(),
            _ => {
                return Err(AnswerError::FamilyMismatch {
                    expected,
                    literal: address.to_string(),
                });
            }
        };

        self.mark_answered();
        self.records.push(ResourceRecord {
            name: QNAME_POINTER.to_vec(),
            rtype: self.question.qtype,
            class: CLASS_IN,
            ttl: ANSWER_TTL,
            rdata,
        });
        self.header.ancount = 1;

        Ok(())
    }

    /// Turn this query into an authoritative answer with no records.
    pub fn synthesize_empty_answer(&mut self) {
        self.mark_answered();
    }

    fn mark_answered(&mut self) {
        self.header.qr = true;
        self.header.aa = true;
        self.header.rcode = 0;
        self.header.ancount = 0;
        self.header.nscount = 0;
        self.header.arcount = 0;
        self.records.clear();
    }
}
