//! Text codec for resource records: one record per line, zone-file
//! syntax (RFC 1035 §5) with the BIND extensions (suffixed TTLs,
//! class/type tokens in either order).

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

use crate::records::{Question, RData, RecordClass, RecordType, ResourceRecord};

/// Zone files conventionally align the record body at this column.
const OWNER_COLUMN_WIDTH: usize = 32;

#[derive(Error, Debug)]
pub enum TextParseError {
    #[error("line begins with whitespace but there is no previous owner")]
    NoPreviousOwner,
    #[error("TTL is not a number: {0:?}")]
    BadTtl(String),
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("unknown record type {0:?}")]
    UnknownType(String),
    #[error("unknown record class {0:?}")]
    UnknownClass(String),
    #[error("bad IPv4 address {0:?}")]
    BadIpv4(String),
    #[error("bad IPv6 address {0:?}")]
    BadIpv6(String),
    #[error("bad integer {0:?}")]
    BadInteger(String),
    #[error("{0:?} is not a valid domain name")]
    BadName(String),
    #[error("only IN class {0} records can be parsed")]
    ClassNotInternet(RecordType),
    #[error("{0} records cannot be parsed from text")]
    UnsupportedType(RecordType),
}

/// Parse a BIND-style duration: concatenated `<int>{s|m|h|d|w}?` pieces
/// summed into seconds, e.g. `"1h30m"` or plain `"86400"`.
pub fn parse_duration_secs(s: &str) -> Option<u64> {
    let bytes = s.as_bytes();
    let mut total: u64 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return None;
        }
        let value: u64 = s[start..i].parse().ok()?;
        let scale = if i < bytes.len() {
            let unit = match bytes[i].to_ascii_lowercase() {
                b's' => 1,
                b'm' => 60,
                b'h' => 60 * 60,
                b'd' => 60 * 60 * 24,
                b'w' => 60 * 60 * 24 * 7,
                _ => return None,
            };
            i += 1;
            unit
        } else {
            1
        };
        total = total.checked_add(value.checked_mul(scale)?)?;
    }
    (!s.is_empty()).then_some(total)
}

/// Fully qualify a name token against the current origin.
/// A bare `.` stands for the origin itself; names already ending in a dot
/// are kept as written.
pub fn qualify_name(token: &str, origin: &str) -> String {
    if token == "." {
        return origin.to_string();
    }
    if token.ends_with('.') {
        return token.to_string();
    }
    if origin == "." {
        format!("{}.", token)
    } else {
        format!("{}.{}", token, origin)
    }
}

fn take_token<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        *rest = trimmed;
        return None;
    }
    let end = trimmed
        .find(|c: char| c.is_whitespace())
        .unwrap_or(trimmed.len());
    let (token, tail) = trimmed.split_at(end);
    *rest = tail;
    Some(token)
}

/// Parse one record line: `[owner] ttl [class] [type] rdata...`.
///
/// A line starting with whitespace reuses `last_owner`. Comments (`;`) and
/// blank lines yield `Ok(None)`. Class and type tokens may appear in either
/// order, as BIND allows.
pub fn parse_record_line(
    line: &str,
    last_owner: Option<&str>,
    origin: &str,
) -> Result<Option<ResourceRecord>, TextParseError> {
    if line.is_empty() {
        return Ok(None);
    }
    let starts_with_space = line.starts_with(|c: char| c.is_whitespace());
    let mut rest = line.trim_start();
    if rest.is_empty() || rest.starts_with(';') {
        return Ok(None);
    }

    let owner = if starts_with_space {
        last_owner.ok_or(TextParseError::NoPreviousOwner)?.to_string()
    } else {
        let token = take_token(&mut rest).ok_or(TextParseError::MissingField("owner"))?;
        qualify_name(token, origin)
    };
    if !crate::records::validate_name(&owner) {
        return Err(TextParseError::BadName(owner));
    }

    let ttl_token = take_token(&mut rest).ok_or(TextParseError::MissingField("ttl"))?;
    if !ttl_token.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(TextParseError::BadTtl(ttl_token.to_string()));
    }
    let ttl = parse_duration_secs(ttl_token)
        .ok_or_else(|| TextParseError::BadTtl(ttl_token.to_string()))? as u32;

    let first = take_token(&mut rest).ok_or(TextParseError::MissingField("class/type"))?;
    let second = take_token(&mut rest).ok_or(TextParseError::MissingField("class/type"))?;
    let (rtype, class) = resolve_class_and_type(first, second)?;

    let rdata = parse_rdata(rtype, class, rest, origin)?;
    Ok(Some(ResourceRecord {
        owner,
        rtype,
        class,
        ttl,
        rdata,
    }))
}

/// The canonical order is `class type` but BIND accepts them reversed;
/// try both pairings before giving up.
fn resolve_class_and_type(
    first: &str,
    second: &str,
) -> Result<(RecordType, RecordClass), TextParseError> {
    if let (Some(class), Some(rtype)) =
        (RecordClass::from_token(first), RecordType::from_token(second))
    {
        return Ok((rtype, class));
    }
    if let (Some(rtype), Some(class)) =
        (RecordType::from_token(first), RecordClass::from_token(second))
    {
        return Ok((rtype, class));
    }
    if RecordType::from_token(first).is_none() && RecordType::from_token(second).is_none() {
        return Err(TextParseError::UnknownType(second.to_string()));
    }
    Err(TextParseError::UnknownClass(first.to_string()))
}

fn parse_rdata(
    rtype: RecordType,
    class: RecordClass,
    mut rest: &str,
    origin: &str,
) -> Result<RData, TextParseError> {
    match rtype {
        RecordType::A => {
            if class != RecordClass::Internet {
                return Err(TextParseError::ClassNotInternet(rtype));
            }
            let token = take_token(&mut rest).ok_or(TextParseError::MissingField("address"))?;
            let ip: Ipv4Addr = token
                .parse()
                .map_err(|_| TextParseError::BadIpv4(token.to_string()))?;
            Ok(RData::A(ip))
        }
        RecordType::AAAA => {
            if class != RecordClass::Internet {
                return Err(TextParseError::ClassNotInternet(rtype));
            }
            let token = take_token(&mut rest).ok_or(TextParseError::MissingField("address"))?;
            Ok(RData::AAAA(parse_ipv6_words(token)?))
        }
        RecordType::NS | RecordType::CNAME | RecordType::PTR => {
            let token = take_token(&mut rest).ok_or(TextParseError::MissingField("name"))?;
            let name = qualify_name(token, origin);
            Ok(match rtype {
                RecordType::NS => RData::NS(name),
                RecordType::CNAME => RData::CNAME(name),
                _ => RData::PTR(name),
            })
        }
        RecordType::MX => {
            let pref_token =
                take_token(&mut rest).ok_or(TextParseError::MissingField("preference"))?;
            let preference: u16 = pref_token
                .parse()
                .map_err(|_| TextParseError::BadInteger(pref_token.to_string()))?;
            let host = take_token(&mut rest).ok_or(TextParseError::MissingField("exchange"))?;
            Ok(RData::MX {
                preference,
                exchange: qualify_name(host, origin),
            })
        }
        RecordType::SOA => {
            // Parentheses only group the interval fields across lines; the
            // loader has already balanced them, so they read as whitespace.
            let flat = rest.replace(['(', ')'], " ");
            let mut rest = flat.as_str();
            let mname_token = take_token(&mut rest).ok_or(TextParseError::MissingField("mname"))?;
            let rname_token = take_token(&mut rest).ok_or(TextParseError::MissingField("rname"))?;
            let mname = qualify_name(mname_token, origin);
            let rname = qualify_name(rname_token, origin);
            let mut values = [0u32; 5];
            for (i, slot) in values.iter_mut().enumerate() {
                let field = ["serial", "refresh", "retry", "expire", "minimum"][i];
                let token = take_token(&mut rest).ok_or(TextParseError::MissingField(field))?;
                *slot = parse_duration_secs(token)
                    .ok_or_else(|| TextParseError::BadInteger(token.to_string()))?
                    as u32;
            }
            Ok(RData::SOA {
                mname,
                rname,
                serial: values[0],
                refresh: values[1],
                retry: values[2],
                expire: values[3],
                minimum: values[4],
            })
        }
        RecordType::TXT => Ok(RData::TXT(rest.trim().to_string())),
        RecordType::HINFO
        | RecordType::AXFR
        | RecordType::MAILB
        | RecordType::Wildcard => Err(TextParseError::UnsupportedType(rtype)),
    }
}

/// Eight colon-separated hex words, e.g. `2001:db8:0:0:0:0:0:1`.
/// The `::` shorthand is not accepted.
fn parse_ipv6_words(token: &str) -> Result<Ipv6Addr, TextParseError> {
    let mut words = [0u16; 8];
    let mut count = 0;
    for part in token.split(':') {
        if count == 8 || part.is_empty() || part.len() > 4 {
            return Err(TextParseError::BadIpv6(token.to_string()));
        }
        words[count] = u16::from_str_radix(part, 16)
            .map_err(|_| TextParseError::BadIpv6(token.to_string()))?;
        count += 1;
    }
    if count != 8 {
        return Err(TextParseError::BadIpv6(token.to_string()));
    }
    Ok(Ipv6Addr::new(
        words[0], words[1], words[2], words[3], words[4], words[5], words[6], words[7],
    ))
}

/// Render a record as a zone-file line. When `last_owner` matches the
/// record's owner, the owner column is left blank so repeated owners read
/// as an indented block.
pub fn record_to_line(rr: &ResourceRecord, last_owner: Option<&str>) -> String {
    let mut out = String::new();
    if last_owner == Some(rr.owner.as_str()) {
        out.push_str(&" ".repeat(OWNER_COLUMN_WIDTH));
    } else if rr.owner.len() < OWNER_COLUMN_WIDTH {
        let _ = write!(out, "{:<width$}", rr.owner, width = OWNER_COLUMN_WIDTH);
    } else {
        out.push_str(&rr.owner);
        out.push(' ');
    }
    let _ = write!(out, "{:<7} {} {} ", rr.ttl, rr.class, rr.rtype);

    match &rr.rdata {
        RData::A(ip) => {
            let _ = write!(out, "{}", ip);
        }
        RData::AAAA(ip) => {
            let words: Vec<String> = ip.segments().iter().map(|w| format!("{:x}", w)).collect();
            out.push_str(&words.join(":"));
        }
        RData::NS(name) | RData::CNAME(name) | RData::PTR(name) => out.push_str(name),
        RData::MX {
            preference,
            exchange,
        } => {
            let _ = write!(out, "{} {}", preference, exchange);
        }
        RData::HINFO { cpu, os } => {
            let _ = write!(out, "{} {}", cpu, os);
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
            let _ = write!(
                out,
                "{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            );
        }
        RData::TXT(text) => out.push_str(text),
        RData::Wildcard => {}
    }
    out.trim_end().to_string()
}

/// Render a question roughly the way `dig` prints one.
pub fn question_to_line(question: &Question) -> String {
    let mut out = String::new();
    if question.qname.len() < OWNER_COLUMN_WIDTH {
        let _ = write!(out, "{:<width$}", question.qname, width = OWNER_COLUMN_WIDTH);
    } else {
        out.push_str(&question.qname);
        out.push(' ');
    }
    let _ = write!(out, "{} {}", question.qclass, question.qtype);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_a_record() {
        let rr = parse_record_line("fun.house 10000 IN A 1.2.3.4", None, "")
            .unwrap()
            .unwrap();
        assert_eq!(rr.owner, "fun.house.");
        assert_eq!(rr.ttl, 10000);
        assert_eq!(rr.rtype, RecordType::A);
        assert_eq!(rr.class, RecordClass::Internet);
        assert_eq!(rr.rdata, RData::A(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn test_parse_reversed_class_and_type() {
        let rr = parse_record_line("extra.fun 10000 A IN 2.3.4.5", None, "")
            .unwrap()
            .unwrap();
        assert_eq!(rr.owner, "extra.fun.");
        assert_eq!(rr.rtype, RecordType::A);
        assert_eq!(rr.class, RecordClass::Internet);
        assert_eq!(rr.rdata, RData::A(Ipv4Addr::new(2, 3, 4, 5)));
    }

    #[test]
    fn test_parse_mx() {
        let rr = parse_record_line("extra.fun. 10000 IN MX 10 mail.host", None, "")
            .unwrap()
            .unwrap();
        assert_eq!(rr.owner, "extra.fun.");
        assert_eq!(
            rr.rdata,
            RData::MX {
                preference: 10,
                exchange: "mail.host.".to_string()
            }
        );
    }

    #[test]
    fn test_leading_space_reuses_owner() {
        let rr = parse_record_line("   10000 IN MX 10 mail.host", Some("extra.fun."), "")
            .unwrap()
            .unwrap();
        assert_eq!(rr.owner, "extra.fun.");

        assert!(matches!(
            parse_record_line("   10000 IN A 1.2.3.4", None, ""),
            Err(TextParseError::NoPreviousOwner)
        ));
    }

    #[test]
    fn test_origin_qualification() {
        let rr = parse_record_line("www 300 IN CNAME web", None, "example.com.")
            .unwrap()
            .unwrap();
        assert_eq!(rr.owner, "www.example.com.");
        assert_eq!(rr.rdata, RData::CNAME("web.example.com.".to_string()));

        let rr = parse_record_line(". 300 IN NS ns1", None, "example.com.")
            .unwrap()
            .unwrap();
        assert_eq!(rr.owner, "example.com.");
    }

    #[test]
    fn test_comments_and_blanks() {
        assert!(parse_record_line("", None, "").unwrap().is_none());
        assert!(parse_record_line("; a comment", None, "").unwrap().is_none());
        assert!(parse_record_line("   ", None, "").unwrap().is_none());
    }

    #[test]
    fn test_bind_ttl_suffixes() {
        assert_eq!(parse_duration_secs("10000"), Some(10000));
        assert_eq!(parse_duration_secs("1h30m"), Some(5400));
        assert_eq!(parse_duration_secs("2w"), Some(1209600));
        assert_eq!(parse_duration_secs("1d12h"), Some(129600));
        assert_eq!(parse_duration_secs("90s"), Some(90));
        assert_eq!(parse_duration_secs("abc"), None);
        assert_eq!(parse_duration_secs(""), None);

        let rr = parse_record_line("slow.example 1h30m IN A 9.9.9.9", None, "")
            .unwrap()
            .unwrap();
        assert_eq!(rr.ttl, 5400);
    }

    #[test]
    fn test_parse_soa_with_parens_and_suffixes() {
        let line = "example.com. 3600 IN SOA ns1.example.com. host.example.com. ( 2024010101 2h 15m 2w 1h )";
        let rr = parse_record_line(line, None, "").unwrap().unwrap();
        assert_eq!(
            rr.rdata,
            RData::SOA {
                mname: "ns1.example.com.".to_string(),
                rname: "host.example.com.".to_string(),
                serial: 2024010101,
                refresh: 7200,
                retry: 900,
                expire: 1209600,
                minimum: 3600,
            }
        );
    }

    #[test]
    fn test_parse_aaaa_words() {
        let rr = parse_record_line("v6.example 60 IN AAAA 2001:db8:0:0:0:0:0:1", None, "")
            .unwrap()
            .unwrap();
        assert_eq!(rr.rdata, RData::AAAA("2001:db8::1".parse().unwrap()));

        assert!(matches!(
            parse_record_line("v6.example 60 IN AAAA 2001:db8::1", None, ""),
            Err(TextParseError::BadIpv6(_))
        ));
    }

    #[test]
    fn test_parse_txt_rest_of_line() {
        let rr = parse_record_line("t.example 60 IN TXT v=spf1 -all", None, "")
            .unwrap()
            .unwrap();
        assert_eq!(rr.rdata, RData::TXT("v=spf1 -all".to_string()));
    }

    #[test]
    fn test_unknown_tokens() {
        assert!(matches!(
            parse_record_line("x 60 IN BOGUS data", None, ""),
            Err(TextParseError::UnknownType(_))
        ));
        assert!(matches!(
            parse_record_line("x 60 ZZ A 1.2.3.4", None, ""),
            Err(TextParseError::UnknownClass(_))
        ));
        assert!(matches!(
            parse_record_line("x nottl IN A 1.2.3.4", None, ""),
            Err(TextParseError::BadTtl(_))
        ));
        let long_label = format!("{} 60 IN A 1.2.3.4", "x".repeat(64));
        assert!(matches!(
            parse_record_line(&long_label, None, ""),
            Err(TextParseError::BadName(_))
        ));
    }

    #[test]
    fn test_query_only_types_rejected_as_rdata() {
        // these tokens resolve to known types, but carry no text rdata
        for (line, rtype) in [
            ("zone.example 60 IN AXFR x", RecordType::AXFR),
            ("box.example 60 IN MAILB x", RecordType::MAILB),
            ("host.example 60 IN HINFO cpu os", RecordType::HINFO),
            ("any.example 60 IN * x", RecordType::Wildcard),
        ] {
            match parse_record_line(line, None, "") {
                Err(TextParseError::UnsupportedType(t)) => assert_eq!(t, rtype),
                other => panic!("expected UnsupportedType for {:?}, got {:?}", line, other),
            }
        }
    }

    #[test]
    fn test_render_roundtrip() {
        let rr = ResourceRecord::mx("extra.fun.", 10, "mail.host.", 10000);
        let line = record_to_line(&rr, None);
        assert!(line.starts_with("extra.fun."));
        let back = parse_record_line(&line, None, "").unwrap().unwrap();
        assert_eq!(back, rr);
    }

    #[test]
    fn test_render_repeated_owner_indents() {
        let rr = ResourceRecord::a("host.example.", Ipv4Addr::new(1, 2, 3, 4), 60);
        let line = record_to_line(&rr, Some("host.example."));
        assert!(line.starts_with(' '));
        let back = parse_record_line(&line, Some("host.example."), "")
            .unwrap()
            .unwrap();
        assert_eq!(back.owner, "host.example.");
    }

    #[test]
    fn test_question_to_line() {
        let q = Question::new("www.example.com", RecordType::A, RecordClass::Internet);
        assert_eq!(question_to_line(&q).trim_end(), format!("{:<32}IN A", "www.example.com").trim_end());
    }
}
