//! Server glue: read a datagram, parse, resolve against the cache, build
//! and write the response. Unparseable datagrams and non-queries are
//! dropped without a reply.

use std::net::SocketAddr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::cache::RrCache;
use crate::logging::QueryLogger;
use crate::packet::{self, DnsMessage, MAX_UDP_PAYLOAD};
use crate::records::ResponseCode;
use crate::resolver::{self, ResolveOutcome};

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// Advertised to clients as the RA bit. This server never recurses
    /// itself; the flag only reports what the operator claims.
    pub recursion_available: bool,
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Resolve every question in `query` and build the response message:
/// same id, response bit set, RD copied through, RA from the options, and
/// `NameError` when every question came back negative.
pub fn handle_message(
    cache: &mut RrCache,
    query: &DnsMessage,
    options: &ServerOptions,
    now: u64,
) -> DnsMessage {
    let mut response = DnsMessage::new(query.id, false);
    response.opcode = query.opcode;
    response.recursion_desired = query.recursion_desired;
    response.recursion_available = options.recursion_available;
    response.questions = query.questions.clone();

    let mut negatives = 0;
    for question in &query.questions {
        if resolver::answer(cache, question, &mut response, now) == ResolveOutcome::Negative {
            negatives += 1;
        }
    }
    if !query.questions.is_empty() && negatives == query.questions.len() {
        response.rcode = ResponseCode::NameError;
    }
    response
}

/// Handle one raw datagram, returning the response bytes. `None` means
/// the datagram gets no reply: it was unparseable or not a query.
pub fn handle_datagram(
    cache: &mut RrCache,
    datagram: &[u8],
    options: &ServerOptions,
    now: u64,
) -> Option<Vec<u8>> {
    let query = match packet::decode(datagram) {
        Ok(message) => message,
        Err(e) => {
            debug!("dropping unparseable datagram: {}", e);
            return None;
        }
    };
    if !query.is_query {
        return None;
    }
    let response = handle_message(cache, &query, options, now);
    Some(encode_response(&response))
}

/// Encode a response within the UDP payload limit, falling back to a
/// bare SERVFAIL header when the message itself cannot be encoded.
fn encode_response(response: &DnsMessage) -> Vec<u8> {
    match packet::encode_with_limit(response, MAX_UDP_PAYLOAD) {
        Ok((bytes, truncated)) => {
            if truncated {
                debug!("response {:#06x} truncated to {} bytes", response.id, MAX_UDP_PAYLOAD);
            }
            bytes
        }
        Err(e) => {
            warn!("failed to encode response {:#06x}: {}", response.id, e);
            let mut failure = DnsMessage::new(response.id, false);
            failure.recursion_desired = response.recursion_desired;
            failure.recursion_available = response.recursion_available;
            failure.rcode = ResponseCode::ServerFailure;
            // a header-only message always encodes
            packet::encode(&failure, true).unwrap_or_default()
        }
    }
}

/// Run a DNS UDP server on the given address. Single-task: the cache is a
/// single-threaded resource and every operation against it is
/// non-blocking, so queries are handled inline between socket reads.
pub async fn run_udp_server(
    addr: SocketAddr,
    cache: &mut RrCache,
    options: ServerOptions,
    logger: Option<&QueryLogger>,
) -> Result<()> {
    let socket = UdpSocket::bind(addr).await?;
    info!("DNS UDP server listening on {}", addr);

    let mut buf = [0u8; 4096];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("UDP recv error: {}", e);
                continue;
            }
        };

        let started = Instant::now();
        let query = match packet::decode(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                debug!("dropping unparseable datagram from {}: {}", src, e);
                continue;
            }
        };
        if !query.is_query {
            continue;
        }

        let response = handle_message(cache, &query, &options, unix_now());
        let bytes = encode_response(&response);

        if let Some(logger) = logger {
            if let Some(question) = query.questions.first() {
                logger.log(
                    &question.qname,
                    &question.qtype.to_string(),
                    response.rcode,
                    &src.ip().to_string(),
                    started.elapsed().as_millis() as u64,
                );
            }
        }

        if let Err(e) = socket.send_to(&bytes, src).await {
            debug!("failed to send response to {}: {}", src, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Question, RData, RecordClass, RecordType, ResourceRecord};
    use std::net::Ipv4Addr;

    const NOW: u64 = 1_000_000;

    fn query_bytes(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
        let mut query = DnsMessage::new(id, true);
        query.recursion_desired = true;
        query
            .questions
            .push(Question::new(name, qtype, RecordClass::Internet));
        packet::encode(&query, true).unwrap()
    }

    #[test]
    fn test_query_answered_from_cache() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::a("host.example", Ipv4Addr::new(5, 6, 7, 8), 300), true, NOW);

        let options = ServerOptions {
            recursion_available: true,
        };
        let bytes = query_bytes(0x4242, "host.example", RecordType::A);
        let response_bytes = handle_datagram(&mut cache, &bytes, &options, NOW).unwrap();
        let response = packet::decode(&response_bytes).unwrap();

        assert_eq!(response.id, 0x4242);
        assert!(!response.is_query);
        assert!(response.recursion_desired);
        assert!(response.recursion_available);
        assert_eq!(response.rcode, ResponseCode::NoError);
        assert_eq!(response.questions.len(), 1);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].rdata, RData::A(Ipv4Addr::new(5, 6, 7, 8)));
    }

    #[test]
    fn test_all_negative_yields_nxdomain() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.add_negative("gone.example", RecordType::A, RecordClass::Internet, NOW + 500, true);

        let bytes = query_bytes(7, "gone.example", RecordType::A);
        let response_bytes =
            handle_datagram(&mut cache, &bytes, &ServerOptions::default(), NOW).unwrap();
        let response = packet::decode(&response_bytes).unwrap();
        assert_eq!(response.rcode, ResponseCode::NameError);
        assert!(response.answers.is_empty());
    }

    #[test]
    fn test_unknown_name_is_noerror_empty() {
        let mut cache = RrCache::new(1 << 20, 1024);
        let bytes = query_bytes(8, "mystery.example", RecordType::A);
        let response_bytes =
            handle_datagram(&mut cache, &bytes, &ServerOptions::default(), NOW).unwrap();
        let response = packet::decode(&response_bytes).unwrap();
        assert_eq!(response.rcode, ResponseCode::NoError);
        assert!(response.answers.is_empty());
    }

    #[test]
    fn test_garbage_and_responses_dropped() {
        let mut cache = RrCache::new(1 << 20, 1024);
        let options = ServerOptions::default();
        assert!(handle_datagram(&mut cache, b"\x01\x02\x03", &options, NOW).is_none());

        let mut response_in = DnsMessage::new(5, false);
        response_in
            .questions
            .push(Question::new("x.example", RecordType::A, RecordClass::Internet));
        let bytes = packet::encode(&response_in, true).unwrap();
        assert!(handle_datagram(&mut cache, &bytes, &options, NOW).is_none());
    }

    #[test]
    fn test_big_answer_truncated() {
        let mut cache = RrCache::new(1 << 20, 2048);
        // A records are multi-valued, so one owner can exceed 512 bytes
        for i in 0..80u8 {
            cache.insert(
                &ResourceRecord::a("big.example", Ipv4Addr::new(10, 0, 0, i), 300),
                true,
                NOW,
            );
        }
        let bytes = query_bytes(9, "big.example", RecordType::A);
        let response_bytes =
            handle_datagram(&mut cache, &bytes, &ServerOptions::default(), NOW).unwrap();
        assert!(response_bytes.len() <= MAX_UDP_PAYLOAD);
        let response = packet::decode(&response_bytes).unwrap();
        assert!(response.is_truncated);
    }

    #[test]
    fn test_mixed_questions_not_nxdomain() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::a("here.example", Ipv4Addr::new(1, 1, 1, 1), 300), true, NOW);
        cache.add_negative("gone.example", RecordType::A, RecordClass::Internet, NOW + 500, true);

        let mut query = DnsMessage::new(3, true);
        query
            .questions
            .push(Question::new("here.example", RecordType::A, RecordClass::Internet));
        query
            .questions
            .push(Question::new("gone.example", RecordType::A, RecordClass::Internet));
        let response = handle_message(&mut cache, &query, &ServerOptions::default(), NOW);
        assert_eq!(response.rcode, ResponseCode::NoError);
        assert_eq!(response.answers.len(), 1);
    }
}
