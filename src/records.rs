//! DNS resource-record data model (RFC 1035 §3).

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Protocol limit on the number of labels in a domain name.
pub const MAX_LABELS: usize = 128;
/// Protocol limit on the length of a single label.
pub const MAX_LABEL_LENGTH: usize = 63;

/// Resource-record types we support (values from RFC 1035 §3.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// `A`: the IPv4 address of a host.
    A,
    /// `NS`: the authoritative name server for the domain.
    NS,
    /// `CNAME`: another name for an alias.
    CNAME,
    /// `SOA`: start of a zone of authority.
    SOA,
    /// `PTR`: a pointer to another part of the domain name space.
    PTR,
    /// `HINFO`: the CPU and OS used by a host.
    HINFO,
    /// `MX`: a mail exchange for the domain.
    MX,
    /// `TXT`: miscellaneous text.
    TXT,
    /// `AAAA`: the IPv6 address of a host (RFC 1886).
    AAAA,
    /// `AXFR`: zone-transfer query type. Queries only.
    AXFR,
    /// `MAILB`: matches mailbox-related records. Queries only.
    MAILB,
    /// `*`: matches any type. Queries only.
    Wildcard,
}

impl RecordType {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(Self::A),
            2 => Some(Self::NS),
            5 => Some(Self::CNAME),
            6 => Some(Self::SOA),
            12 => Some(Self::PTR),
            13 => Some(Self::HINFO),
            15 => Some(Self::MX),
            16 => Some(Self::TXT),
            28 => Some(Self::AAAA),
            252 => Some(Self::AXFR),
            253 => Some(Self::MAILB),
            255 => Some(Self::Wildcard),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::NS => 2,
            Self::CNAME => 5,
            Self::SOA => 6,
            Self::PTR => 12,
            Self::HINFO => 13,
            Self::MX => 15,
            Self::TXT => 16,
            Self::AAAA => 28,
            Self::AXFR => 252,
            Self::MAILB => 253,
            Self::Wildcard => 255,
        }
    }

    /// Parse a zone-file type token ("A", "mx", "*", ...).
    pub fn from_token(token: &str) -> Option<Self> {
        if token == "*" {
            return Some(Self::Wildcard);
        }
        match token.to_ascii_lowercase().as_str() {
            "a" => Some(Self::A),
            "ns" => Some(Self::NS),
            "cname" => Some(Self::CNAME),
            "soa" => Some(Self::SOA),
            "ptr" => Some(Self::PTR),
            "hinfo" => Some(Self::HINFO),
            "mx" => Some(Self::MX),
            "txt" => Some(Self::TXT),
            "aaaa" => Some(Self::AAAA),
            "axfr" => Some(Self::AXFR),
            "mailb" => Some(Self::MAILB),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::PTR => "PTR",
            Self::HINFO => "HINFO",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::AXFR => "AXFR",
            Self::MAILB => "MAILB",
            Self::Wildcard => "*",
        };
        write!(f, "{}", s)
    }
}

/// Record classes (RFC 1035 §3.2.4). Only `Internet` is fully supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordClass {
    Internet,
    Chaos,
    Hesiod,
    /// `*`: any class. Queries only.
    Wildcard,
}

impl RecordClass {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(Self::Internet),
            3 => Some(Self::Chaos),
            4 => Some(Self::Hesiod),
            255 => Some(Self::Wildcard),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::Internet => 1,
            Self::Chaos => 3,
            Self::Hesiod => 4,
            Self::Wildcard => 255,
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        if token == "*" {
            return Some(Self::Wildcard);
        }
        match token.to_ascii_lowercase().as_str() {
            "in" => Some(Self::Internet),
            "ch" => Some(Self::Chaos),
            "hs" => Some(Self::Hesiod),
            _ => None,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Internet => "IN",
            Self::Chaos => "CH",
            Self::Hesiod => "HS",
            Self::Wildcard => "*",
        };
        write!(f, "{}", s)
    }
}

/// The 4-bit response code in the message header (RFC 1035 §4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseCode {
    #[default]
    NoError,
    FormatError,
    ServerFailure,
    NameError,
    NotImplemented,
    Refused,
}

impl ResponseCode {
    pub fn from_u4(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::NoError),
            1 => Some(Self::FormatError),
            2 => Some(Self::ServerFailure),
            3 => Some(Self::NameError),
            4 => Some(Self::NotImplemented),
            5 => Some(Self::Refused),
            _ => None,
        }
    }

    pub fn to_u4(self) -> u8 {
        match self {
            Self::NoError => 0,
            Self::FormatError => 1,
            Self::ServerFailure => 2,
            Self::NameError => 3,
            Self::NotImplemented => 4,
            Self::Refused => 5,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoError => "NOERROR",
            Self::FormatError => "FORMERR",
            Self::ServerFailure => "SERVFAIL",
            Self::NameError => "NXDOMAIN",
            Self::NotImplemented => "NOTIMP",
            Self::Refused => "REFUSED",
        };
        write!(f, "{}", s)
    }
}

/// Type-specific record data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    PTR(String),
    MX {
        /// "Lower is better."
        preference: u16,
        exchange: String,
    },
    HINFO {
        cpu: String,
        os: String,
    },
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    TXT(String),
    /// Query-only pseudo-data; also used by negative cache entries.
    Wildcard,
}

/// A complete DNS resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// The name at which the record lives.
    pub owner: String,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl ResourceRecord {
    pub fn a(owner: &str, ip: Ipv4Addr, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::A,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::A(ip),
        }
    }

    pub fn aaaa(owner: &str, ip: Ipv6Addr, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::AAAA,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::AAAA(ip),
        }
    }

    pub fn ns(owner: &str, name_server: &str, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::NS,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::NS(name_server.to_string()),
        }
    }

    pub fn cname(owner: &str, canonical: &str, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::CNAME,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::CNAME(canonical.to_string()),
        }
    }

    pub fn ptr(owner: &str, target: &str, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::PTR,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::PTR(target.to_string()),
        }
    }

    pub fn mx(owner: &str, preference: u16, exchange: &str, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::MX,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::MX {
                preference,
                exchange: exchange.to_string(),
            },
        }
    }

    pub fn hinfo(owner: &str, cpu: &str, os: &str, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::HINFO,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::HINFO {
                cpu: cpu.to_string(),
                os: os.to_string(),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn soa(
        owner: &str,
        mname: &str,
        rname: &str,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
        ttl: u32,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::SOA,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::SOA {
                mname: mname.to_string(),
                rname: rname.to_string(),
                serial,
                refresh,
                retry,
                expire,
                minimum,
            },
        }
    }

    pub fn txt(owner: &str, text: &str, ttl: u32) -> Self {
        Self {
            owner: owner.to_string(),
            rtype: RecordType::TXT,
            class: RecordClass::Internet,
            ttl,
            rdata: RData::TXT(text.to_string()),
        }
    }

    /// Whether this record satisfies a `(qtype, qclass)` query.
    /// CNAMEs do not match here; callers dereference them explicitly.
    pub fn matches_query(&self, qtype: RecordType, qclass: RecordClass) -> bool {
        (qclass == RecordClass::Wildcard || qclass == self.class)
            && (qtype == RecordType::Wildcard || qtype == self.rtype)
    }
}

/// A DNS question: name, type, and class being asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(qname: &str, qtype: RecordType, qclass: RecordClass) -> Self {
        Self {
            qname: qname.to_string(),
            qtype,
            qclass,
        }
    }
}

/// Fold an owner name into its case-insensitive lookup key.
/// A single trailing dot is ignored, so zone names like `"foo.bar."`
/// and wire names like `"foo.bar"` share a key. The root folds to `""`.
pub fn fold_owner(name: &str) -> String {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    trimmed.to_ascii_lowercase()
}

/// Strip the leading label: `"a.b.c"` → `"b.c"`, `"c"` → `""` (the root).
/// Returns `None` once the root has been reached.
pub fn parent_name(name: &str) -> Option<&str> {
    if name.is_empty() || name == "." {
        return None;
    }
    match name.find('.') {
        Some(pos) => Some(name[pos + 1..].trim_start_matches('.')),
        None => Some(""),
    }
}

/// Verify that a name meets the limits required of an internet hostname:
/// at most [`MAX_LABELS`] labels, each at most [`MAX_LABEL_LENGTH`] bytes.
pub fn validate_name(name: &str) -> bool {
    let trimmed = name.strip_suffix('.').unwrap_or(name);
    if trimmed.is_empty() {
        return true;
    }
    let mut count = 0;
    for label in trimmed.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LENGTH {
            return false;
        }
        count += 1;
        if count > MAX_LABELS {
            return false;
        }
    }
    true
}

/// Whether SOA serial `a` precedes `b` in RFC 1982 sequence space.
pub fn serial_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes_roundtrip() {
        for code in [1u16, 2, 5, 6, 12, 13, 15, 16, 28, 252, 253, 255] {
            let rtype = RecordType::from_u16(code).unwrap();
            assert_eq!(rtype.to_u16(), code);
        }
        assert!(RecordType::from_u16(99).is_none());
    }

    #[test]
    fn test_type_tokens() {
        assert_eq!(RecordType::from_token("mx"), Some(RecordType::MX));
        assert_eq!(RecordType::from_token("AAAA"), Some(RecordType::AAAA));
        assert_eq!(RecordType::from_token("axfr"), Some(RecordType::AXFR));
        assert_eq!(RecordType::from_token("mailb"), Some(RecordType::MAILB));
        assert_eq!(RecordType::from_token("*"), Some(RecordType::Wildcard));
        assert!(RecordType::from_token("bogus").is_none());
    }

    #[test]
    fn test_class_tokens() {
        assert_eq!(RecordClass::from_token("IN"), Some(RecordClass::Internet));
        assert_eq!(RecordClass::from_token("hs"), Some(RecordClass::Hesiod));
        assert!(RecordClass::from_token("A").is_none());
    }

    #[test]
    fn test_matches_query_wildcards() {
        let rr = ResourceRecord::a("host.example", Ipv4Addr::new(1, 2, 3, 4), 300);
        assert!(rr.matches_query(RecordType::A, RecordClass::Internet));
        assert!(rr.matches_query(RecordType::Wildcard, RecordClass::Internet));
        assert!(rr.matches_query(RecordType::A, RecordClass::Wildcard));
        assert!(!rr.matches_query(RecordType::MX, RecordClass::Internet));
        assert!(!rr.matches_query(RecordType::A, RecordClass::Chaos));
    }

    #[test]
    fn test_fold_owner() {
        assert_eq!(fold_owner("Foo.Bar"), "foo.bar");
        assert_eq!(fold_owner("foo.bar."), "foo.bar");
        assert_eq!(fold_owner("."), "");
        assert_eq!(fold_owner(""), "");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("www.example.com"));
        assert!(validate_name("www.example.com."));
        assert!(validate_name(""));
        assert!(!validate_name("a..b"));
        assert!(!validate_name(&"x".repeat(64)));
        let deep = vec!["a"; 129].join(".");
        assert!(!validate_name(&deep));
    }

    #[test]
    fn test_serial_arithmetic() {
        assert!(serial_lt(1, 2));
        assert!(!serial_lt(2, 1));
        // wraparound: 0xFFFFFFFF precedes 1 in sequence space
        assert!(serial_lt(u32::MAX, 1));
    }
}
