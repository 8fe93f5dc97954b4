//! DNS wire format codec (RFC 1035).
//!
//! Decoding goes through [`Reader`], a cursor that checks every field against
//! the end of the buffer before touching it. Names are kept in wire form:
//! compression pointers are recognised and consumed but never followed, so
//! forwarded packets come back out exactly as they went in.

use crate::error::WireError;

use super::message::{Header, Message, Question, ResourceRecord};

pub const HEADER_LEN: usize = 12;

/// Longest encoded name accepted, terminator included.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_PACKET_SIZE: usize = 4096;

const POINTER_MASK: u8 = 0xC0;

/// Bounds-checked big-endian reader over a received datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::Truncated {
                offset: self.pos,
                needed: n,
                len: self.buf.len(),
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a name field: labels up to a zero label, or up to and including
    /// a two byte compression pointer.
    fn name(&mut self) -> Result<Vec<u8>, WireError> {
        let start = self.pos;

        loop {
            let offset = self.pos;
            let len = self.u8()?;

            match len & POINTER_MASK {
                POINTER_MASK => {
                    self.take(1)?;
                    break;
                }
                0 if len == 0 => break,
                0 => {
                    self.take(len as usize)?;
                }
                _ => return Err(WireError::BadLabel(len, offset)),
            }

            if self.pos - start > MAX_NAME_LEN {
                return Err(WireError::NameTooLong(self.pos - start));
            }
        }

        let name_len = self.pos - start;
        if name_len > MAX_NAME_LEN {
            return Err(WireError::NameTooLong(name_len));
        }

        Ok(self.buf[start..self.pos].to_vec())
    }
}

fn read_header(r: &mut Reader<'_>) -> Result<Header, WireError> {
    let id = r.u16()?;
    let flags = r.u16()?;
    let qdcount = r.u16()?;
    let ancount = r.u16()?;
    let nscount = r.u16()?;
    let arcount = r.u16()?;

    let mut header = Header::from_flags(id, flags);
    header.qdcount = qdcount;
    header.ancount = ancount;
    header.nscount = nscount;
    header.arcount = arcount;
    Ok(header)
}

fn read_record(r: &mut Reader<'_>) -> Result<ResourceRecord, WireError> {
    let name = r.name()?;
    let rtype = r.u16()?;
    let class = r.u16()?;
    let ttl = r.u32()?;
    let rdlength = r.u16()? as usize;

    if rdlength > MAX_PACKET_SIZE {
        return Err(WireError::RecordTooLarge(rdlength));
    }
    let rdata = r.take(rdlength)?.to_vec();

    Ok(ResourceRecord {
        name,
        rtype,
        class,
        ttl,
        rdata,
    })
}

/// Decode a datagram into a [`Message`].
///
/// Fails on anything shorter than a header, on questions counts other than
/// one, on oversize names or record data, and on any field that would run
/// past the end of `buf`. Bytes after the last declared record are ignored.
pub fn decode(buf: &[u8]) -> Result<Message, WireError> {
    let mut r = Reader::new(buf);
    let header = read_header(&mut r)?;

    if header.qdcount != 1 {
        return Err(WireError::QuestionCount(header.qdcount));
    }

    let question = Question {
        qname: r.name()?,
        qtype: r.u16()?,
        qclass: r.u16()?,
    };

    let total = header.ancount as usize + header.nscount as usize + header.arcount as usize;
    // Every record needs at least 11 bytes, so cap the allocation by what the
    // buffer could actually hold.
    let mut records = Vec::with_capacity(total.min(buf.len() / 11));
    for _ in 0..total {
        records.push(read_record(&mut r)?);
    }

    Ok(Message {
        header,
        question,
        records,
    })
}

/// Encode a [`Message`] to wire format bytes.
///
/// Counts are written from the header as-is; the message mutations in
/// [`Message`] keep them in step with `records`.
pub fn encode(message: &Message) -> Vec<u8> {
    let mut data = Vec::with_capacity(message.wire_len());
    let h = &message.header;

    // Header
    data.extend_from_slice(&h.id.to_be_bytes());
    data.extend_from_slice(&h.flags().to_be_bytes());
    data.extend_from_slice(&h.qdcount.to_be_bytes());
    data.extend_from_slice(&h.ancount.to_be_bytes());
    data.extend_from_slice(&h.nscount.to_be_bytes());
    data.extend_from_slice(&h.arcount.to_be_bytes());

    // Question
    let q = &message.question;
    data.extend_from_slice(&q.qname);
    data.extend_from_slice(&q.qtype.to_be_bytes());
    data.extend_from_slice(&q.qclass.to_be_bytes());

    // Records
    for rr in &message.records {
        data.extend_from_slice(&rr.name);
        data.extend_from_slice(&rr.rtype.to_be_bytes());
        data.extend_from_slice(&rr.class.to_be_bytes());
        data.extend_from_slice(&rr.ttl.to_be_bytes());
        data.extend_from_slice(&(rr.rdata.len() as u16).to_be_bytes());
        data.extend_from_slice(&rr.rdata);
    }

    data
}
