//! DNS wire format parser and serializer (RFC 1035 §4), including
//! name compression (§4.1.4).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::records::{
    Question, RData, RecordClass, RecordType, ResourceRecord, ResponseCode, MAX_LABELS,
};

/// Well-known port for name servers.
pub const DNS_PORT: u16 = 53;

/// Classic UDP payload limit (RFC 1035 §4.2.1).
pub const MAX_UDP_PAYLOAD: usize = 512;

/// Largest message offset a compression pointer can encode (14 bits).
const MAX_POINTER_OFFSET: usize = (1 << 14) - 1;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("packet truncated at offset {0}")]
    Truncated(usize),
    #[error("bad label length byte at offset {0}")]
    BadLabel(usize),
    #[error("compression pointer to unparsed offset {0}")]
    UnresolvedPointer(usize),
    #[error("name has more than {MAX_LABELS} labels")]
    TooManyLabels,
    #[error("invalid UTF-8 in name or string")]
    InvalidUtf8,
    #[error("rdata length {declared} does not match decoded content ({decoded})")]
    RdlenMismatch { declared: usize, decoded: usize },
    #[error("unknown record type {0}")]
    UnknownType(u16),
    #[error("unknown record class {0}")]
    UnknownClass(u16),
    #[error("unknown response code {0}")]
    UnknownRcode(u8),
    #[error("{0} records are only supported in class IN")]
    ClassNotInternet(RecordType),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("cannot encode {0} records")]
    Unsupported(RecordType),
    #[error("cannot encode {0} records outside class IN")]
    ClassNotInternet(RecordType),
}

/// A parsed or to-be-serialized DNS message (RFC 1035 §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsMessage {
    /// Used by the requestor to match queries and replies.
    pub id: u16,
    pub is_query: bool,
    /// Only QUERY (0) is generated; other opcodes pass through unchanged.
    pub opcode: u8,
    pub is_authoritative: bool,
    pub is_truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub rcode: ResponseCode,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
}

impl DnsMessage {
    pub fn new(id: u16, is_query: bool) -> Self {
        Self {
            id,
            is_query,
            opcode: 0,
            is_authoritative: false,
            is_truncated: false,
            recursion_desired: false,
            recursion_available: false,
            rcode: ResponseCode::NoError,
            questions: Vec::new(),
            answers: Vec::new(),
            authority: Vec::new(),
            additional: Vec::new(),
        }
    }
}

impl fmt::Display for DnsMessage {
    /// Human-readable dump, one line per question and record.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "id={:#06x} {} opcode={} aa={} tc={} rd={} ra={} rcode={}",
            self.id,
            if self.is_query { "query" } else { "response" },
            self.opcode,
            self.is_authoritative,
            self.is_truncated,
            self.recursion_desired,
            self.recursion_available,
            self.rcode,
        )?;
        for q in &self.questions {
            writeln!(f, "  ?? {}", crate::text::question_to_line(q))?;
        }
        for (section, records) in [
            ("an", &self.answers),
            ("ns", &self.authority),
            ("ar", &self.additional),
        ] {
            for rr in records {
                writeln!(f, "  {} {}", section, crate::text::record_to_line(rr, None))?;
            }
        }
        Ok(())
    }
}

/// Decode one DNS message from the front of a datagram.
/// Bytes past the counted sections are ignored.
pub fn decode(buf: &[u8]) -> Result<DnsMessage, ParseError> {
    let mut reader = Reader::new(buf);
    let message = reader.read_message()?;
    Ok(message)
}

/// Serialize a message, optionally with name compression.
pub fn encode(message: &DnsMessage, compress: bool) -> Result<Vec<u8>, EncodeError> {
    let mut writer = Writer::new(compress);
    writer.write_message(message)?;
    Ok(writer.buf)
}

/// Serialize compressed, truncating to `max` bytes when the encoding is
/// longer. On truncation the TC bit is set and the record counts are zeroed
/// since the surviving tail may split a record. Returns `(bytes, truncated)`.
pub fn encode_with_limit(
    message: &DnsMessage,
    max: usize,
) -> Result<(Vec<u8>, bool), EncodeError> {
    let mut bytes = encode(message, true)?;
    if bytes.len() <= max {
        return Ok((bytes, false));
    }
    bytes.truncate(max);
    if bytes.len() >= 3 {
        bytes[2] |= 0x02;
    }
    if bytes.len() >= 12 {
        for b in &mut bytes[6..12] {
            *b = 0;
        }
    }
    Ok((bytes, true))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Offsets of labels read head-first, mapped to the decoded suffix
    /// starting there. Suffixes reached only through a pointer are not
    /// registered under the pointer's own offset.
    names: FxHashMap<usize, String>,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            names: FxHashMap::default(),
        }
    }

    fn read_u8(&mut self) -> Result<u8, ParseError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(ParseError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16, ParseError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ParseError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ParseError::Truncated(self.pos))?;
        if end > self.buf.len() {
            return Err(ParseError::Truncated(self.pos));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_message(&mut self) -> Result<DnsMessage, ParseError> {
        let id = self.read_u16()?;
        let flags = self.read_u16()?;
        let qd_count = self.read_u16()?;
        let an_count = self.read_u16()?;
        let ns_count = self.read_u16()?;
        let ar_count = self.read_u16()?;

        let rcode_bits = (flags & 0x000F) as u8;
        let mut message = DnsMessage::new(id, flags & 0x8000 == 0);
        message.opcode = ((flags >> 11) & 0xF) as u8;
        message.is_authoritative = flags & 0x0400 != 0;
        message.is_truncated = flags & 0x0200 != 0;
        message.recursion_desired = flags & 0x0100 != 0;
        message.recursion_available = flags & 0x0080 != 0;
        message.rcode =
            ResponseCode::from_u4(rcode_bits).ok_or(ParseError::UnknownRcode(rcode_bits))?;

        for _ in 0..qd_count {
            let question = self.read_question()?;
            message.questions.push(question);
        }
        for _ in 0..an_count {
            message.answers.push(self.read_record()?);
        }
        for _ in 0..ns_count {
            message.authority.push(self.read_record()?);
        }
        for _ in 0..ar_count {
            message.additional.push(self.read_record()?);
        }
        Ok(message)
    }

    fn read_question(&mut self) -> Result<Question, ParseError> {
        let qname = self.read_name()?;
        let qtype_raw = self.read_u16()?;
        let qclass_raw = self.read_u16()?;
        Ok(Question {
            qname,
            qtype: RecordType::from_u16(qtype_raw).ok_or(ParseError::UnknownType(qtype_raw))?,
            qclass: RecordClass::from_u16(qclass_raw)
                .ok_or(ParseError::UnknownClass(qclass_raw))?,
        })
    }

    /// Decompress a domain name (RFC 1035 §4.1.4).
    ///
    /// Each label read in place is registered in the offset table so later
    /// pointers can reference it; a pointer must target an offset already
    /// parsed head-first, which also rules out pointer loops.
    fn read_name(&mut self) -> Result<String, ParseError> {
        let mut parts: Vec<(usize, String)> = Vec::new();
        let mut tail: Option<String> = None;

        loop {
            let offset = self.pos;
            let len = self.read_u8()? as usize;
            if len & 0xC0 == 0xC0 {
                let low = self.read_u8()? as usize;
                let target = ((len & 0x3F) << 8) | low;
                let suffix = self
                    .names
                    .get(&target)
                    .ok_or(ParseError::UnresolvedPointer(target))?;
                tail = Some(suffix.clone());
                break;
            }
            if len & 0xC0 != 0 {
                // "reserved for future use" bit patterns
                return Err(ParseError::BadLabel(offset));
            }
            if len == 0 {
                break;
            }
            let bytes = self.read_bytes(len)?;
            let label = std::str::from_utf8(bytes)
                .map_err(|_| ParseError::InvalidUtf8)?
                .to_string();
            parts.push((offset, label));
            if parts.len() > MAX_LABELS {
                return Err(ParseError::TooManyLabels);
            }
        }

        // Assemble suffixes from the tail in, registering each label's
        // offset for future decompression.
        let mut suffix = tail.unwrap_or_default();
        let mut name = suffix.clone();
        for (offset, label) in parts.into_iter().rev() {
            if suffix.is_empty() {
                suffix = label;
            } else {
                suffix = format!("{}.{}", label, suffix);
            }
            name = suffix.clone();
            self.names.insert(offset, suffix.clone());
        }
        if !name.is_empty() && name.split('.').count() > MAX_LABELS {
            return Err(ParseError::TooManyLabels);
        }
        Ok(name)
    }

    /// One `<len><bytes>` character string.
    fn read_char_string(&mut self, max: usize) -> Result<String, ParseError> {
        let start = self.pos;
        let len = self.read_u8()? as usize;
        if len == 0 || len > max.saturating_sub(1) {
            return Err(ParseError::BadLabel(start));
        }
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| ParseError::InvalidUtf8)
    }

    fn read_record(&mut self) -> Result<ResourceRecord, ParseError> {
        let owner = self.read_name()?;
        let rtype_raw = self.read_u16()?;
        let class_raw = self.read_u16()?;
        let ttl = self.read_u32()?;
        let rdlen = self.read_u16()? as usize;

        let rtype = RecordType::from_u16(rtype_raw).ok_or(ParseError::UnknownType(rtype_raw))?;
        let class = RecordClass::from_u16(class_raw).ok_or(ParseError::UnknownClass(class_raw))?;

        let start = self.pos;
        if start + rdlen > self.buf.len() {
            return Err(ParseError::Truncated(start));
        }

        let rdata = match rtype {
            RecordType::A => {
                if class != RecordClass::Internet {
                    return Err(ParseError::ClassNotInternet(rtype));
                }
                if rdlen != 4 {
                    return Err(ParseError::RdlenMismatch {
                        declared: rdlen,
                        decoded: 4,
                    });
                }
                let bytes = self.read_bytes(4)?;
                RData::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            RecordType::AAAA => {
                if class != RecordClass::Internet {
                    return Err(ParseError::ClassNotInternet(rtype));
                }
                if rdlen != 16 {
                    return Err(ParseError::RdlenMismatch {
                        declared: rdlen,
                        decoded: 16,
                    });
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(self.read_bytes(16)?);
                RData::AAAA(Ipv6Addr::from(octets))
            }
            RecordType::NS => RData::NS(self.read_name()?),
            RecordType::CNAME => RData::CNAME(self.read_name()?),
            RecordType::PTR => RData::PTR(self.read_name()?),
            RecordType::MX => {
                let preference = self.read_u16()?;
                let exchange = self.read_name()?;
                RData::MX {
                    preference,
                    exchange,
                }
            }
            RecordType::HINFO => {
                let cpu = self.read_char_string(rdlen)?;
                let used = self.pos - start;
                let os = self.read_char_string(rdlen - used)?;
                RData::HINFO { cpu, os }
            }
            RecordType::SOA => {
                let mname = self.read_name()?;
                let rname = self.read_name()?;
                RData::SOA {
                    mname,
                    rname,
                    serial: self.read_u32()?,
                    refresh: self.read_u32()?,
                    retry: self.read_u32()?,
                    expire: self.read_u32()?,
                    minimum: self.read_u32()?,
                }
            }
            RecordType::TXT => {
                // One or more length-prefixed strings, concatenated.
                let mut text = String::new();
                while self.pos < start + rdlen {
                    let len = self.read_u8()? as usize;
                    if self.pos + len > start + rdlen {
                        return Err(ParseError::RdlenMismatch {
                            declared: rdlen,
                            decoded: self.pos + len - start,
                        });
                    }
                    let bytes = self.read_bytes(len)?;
                    text.push_str(std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)?);
                }
                RData::TXT(text)
            }
            RecordType::Wildcard => RData::Wildcard,
            RecordType::AXFR | RecordType::MAILB => {
                return Err(ParseError::UnknownType(rtype_raw));
            }
        };

        let decoded = self.pos - start;
        if decoded != rdlen {
            return Err(ParseError::RdlenMismatch {
                declared: rdlen,
                decoded,
            });
        }

        Ok(ResourceRecord {
            owner,
            rtype,
            class,
            ttl,
            rdata,
        })
    }
}

struct Writer {
    buf: Vec<u8>,
    compress: bool,
    /// Suffix strings already written, mapped to their message offsets.
    offsets: FxHashMap<String, usize>,
}

impl Writer {
    fn new(compress: bool) -> Self {
        Self {
            buf: Vec::with_capacity(MAX_UDP_PAYLOAD),
            compress,
            offsets: FxHashMap::default(),
        }
    }

    fn write_message(&mut self, message: &DnsMessage) -> Result<(), EncodeError> {
        self.buf.extend_from_slice(&message.id.to_be_bytes());
        let flags: u16 = (if message.is_query { 0 } else { 1 << 15 })
            | ((message.opcode as u16 & 0xF) << 11)
            | (if message.is_authoritative { 1 << 10 } else { 0 })
            | (if message.is_truncated { 1 << 9 } else { 0 })
            | (if message.recursion_desired { 1 << 8 } else { 0 })
            | (if message.recursion_available { 1 << 7 } else { 0 })
            | message.rcode.to_u4() as u16;
        self.buf.extend_from_slice(&flags.to_be_bytes());
        for count in [
            message.questions.len(),
            message.answers.len(),
            message.authority.len(),
            message.additional.len(),
        ] {
            self.buf.extend_from_slice(&(count as u16).to_be_bytes());
        }

        for question in &message.questions {
            self.write_name(&question.qname);
            self.buf
                .extend_from_slice(&question.qtype.to_u16().to_be_bytes());
            self.buf
                .extend_from_slice(&question.qclass.to_u16().to_be_bytes());
        }
        for rr in &message.answers {
            self.write_record(rr)?;
        }
        for rr in &message.authority {
            self.write_record(rr)?;
        }
        for rr in &message.additional {
            self.write_record(rr)?;
        }
        Ok(())
    }

    /// Write a name as labels, replacing the longest already-written suffix
    /// with a two-byte pointer. Suffixes past the 14-bit offset range are
    /// written literally and not registered.
    fn write_name(&mut self, name: &str) {
        let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
        for i in 0..labels.len() {
            let suffix = labels[i..].join(".");
            if self.compress {
                if let Some(&offset) = self.offsets.get(&suffix) {
                    self.buf.push(0xC0 | (offset >> 8) as u8);
                    self.buf.push((offset & 0xFF) as u8);
                    return;
                }
                let offset = self.buf.len();
                if offset <= MAX_POINTER_OFFSET {
                    self.offsets.insert(suffix, offset);
                }
            }
            let label = labels[i].as_bytes();
            let len = label.len().min(63);
            self.buf.push(len as u8);
            self.buf.extend_from_slice(&label[..len]);
        }
        self.buf.push(0);
    }

    fn write_char_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let len = bytes.len().min(255);
        self.buf.push(len as u8);
        self.buf.extend_from_slice(&bytes[..len]);
    }

    fn write_record(&mut self, rr: &ResourceRecord) -> Result<(), EncodeError> {
        match rr.rtype {
            RecordType::AXFR | RecordType::MAILB => {
                return Err(EncodeError::Unsupported(rr.rtype));
            }
            RecordType::A | RecordType::AAAA if rr.class != RecordClass::Internet => {
                return Err(EncodeError::ClassNotInternet(rr.rtype));
            }
            _ => {}
        }

        self.write_name(&rr.owner);
        self.buf.extend_from_slice(&rr.rtype.to_u16().to_be_bytes());
        self.buf.extend_from_slice(&rr.class.to_u16().to_be_bytes());
        self.buf.extend_from_slice(&rr.ttl.to_be_bytes());

        // rdata is written straight into the message so compression offsets
        // stay valid; the length is patched in afterwards.
        let rdlen_pos = self.buf.len();
        self.buf.extend_from_slice(&[0, 0]);
        let start = self.buf.len();

        match &rr.rdata {
            RData::A(ip) => self.buf.extend_from_slice(&ip.octets()),
            RData::AAAA(ip) => self.buf.extend_from_slice(&ip.octets()),
            RData::NS(name) | RData::CNAME(name) | RData::PTR(name) => {
                self.write_name(name);
            }
            RData::MX {
                preference,
                exchange,
            } => {
                self.buf.extend_from_slice(&preference.to_be_bytes());
                self.write_name(exchange);
            }
            RData::HINFO { cpu, os } => {
                self.write_char_string(cpu);
                self.write_char_string(os);
            }
            RData::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                self.write_name(mname);
                self.write_name(rname);
                for value in [serial, refresh, retry, expire, minimum] {
                    self.buf.extend_from_slice(&value.to_be_bytes());
                }
            }
            RData::TXT(text) => {
                let bytes = text.as_bytes();
                if bytes.is_empty() {
                    self.buf.push(0);
                }
                for chunk in bytes.chunks(255) {
                    self.buf.push(chunk.len() as u8);
                    self.buf.extend_from_slice(chunk);
                }
            }
            RData::Wildcard => {}
        }

        let rdlen = (self.buf.len() - start) as u16;
        self.buf[rdlen_pos..rdlen_pos + 2].copy_from_slice(&rdlen.to_be_bytes());
        Ok(())
    }
}
