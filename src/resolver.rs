//! Local resolver: answers DNS questions purely from cache contents,
//! never deferring to the network and never blocking.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::cache::RrCache;
use crate::packet::DnsMessage;
use crate::records::{fold_owner, parent_name, Question, RData, RecordType};

/// Result of answering one question against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The answer section fully satisfies the question.
    Success,
    /// Something useful was found (a CNAME without its target, or an NS
    /// referral in the authority section), but not a complete answer.
    PartialData,
    /// The cache knows nothing relevant.
    NoData,
    /// A negative cache entry says the data does not exist.
    Negative,
}

/// Answer `question` from the cache, appending what was found to
/// `response`. CNAME chains are followed (with a visited set, so cycles
/// terminate); when nothing at all is known, NS records found walking up
/// the owner hierarchy are copied into the authority section as a
/// referral. Expired entries are flushed first.
pub fn answer(
    cache: &mut RrCache,
    question: &Question,
    response: &mut DnsMessage,
    now: u64,
) -> ResolveOutcome {
    cache.flush(now);

    let mut name = question.qname.clone();
    let mut visited = FxHashSet::default();
    visited.insert(fold_owner(&name));
    let mut got_something = false;
    let mut satisfied = false;

    loop {
        let ids = cache.lookup_list(&name, RecordType::Wildcard, question.qclass);
        if ids.is_empty() {
            if cache.is_negative(&name, question.qtype, question.qclass) {
                return ResolveOutcome::Negative;
            }
            // Nothing at this name: hunt for NS records up the hierarchy
            // and hand them back as a referral.
            let mut up = fold_owner(&name);
            while let Some(parent) = parent_name(&up).map(str::to_string) {
                up = parent;
                let ns_ids = cache.lookup_list(&up, RecordType::NS, question.qclass);
                if !ns_ids.is_empty() {
                    for id in ns_ids {
                        if let Some(rr) = cache.record(id) {
                            response.authority.push(rr.clone());
                        }
                    }
                    return ResolveOutcome::PartialData;
                }
            }
            return if got_something {
                ResolveOutcome::PartialData
            } else {
                ResolveOutcome::NoData
            };
        }

        let mut cname: Option<String> = None;
        for id in ids {
            let Some(rr) = cache.record(id) else { continue };
            if rr.rtype == question.qtype
                || rr.rtype == RecordType::CNAME
                || question.qtype == RecordType::Wildcard
            {
                if rr.rtype == question.qtype || question.qtype == RecordType::Wildcard {
                    satisfied = true;
                }
                response.answers.push(rr.clone());
                got_something = true;
            }
            if rr.rtype == RecordType::CNAME {
                if let RData::CNAME(target) = &rr.rdata {
                    cname = Some(target.clone());
                }
            }
        }

        // A CNAME redirects the rest of the query, unless CNAMEs were what
        // the caller asked for.
        match cname {
            Some(target) if question.qtype != RecordType::CNAME => {
                if visited.insert(fold_owner(&target)) {
                    name = target;
                } else {
                    debug!("CNAME cycle involving {}", target);
                    break;
                }
            }
            _ => break,
        }
    }

    if satisfied {
        ResolveOutcome::Success
    } else if got_something {
        ResolveOutcome::PartialData
    } else {
        ResolveOutcome::NoData
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{RecordClass, ResourceRecord};
    use std::net::Ipv4Addr;

    const NOW: u64 = 1_000_000;

    fn question(name: &str, qtype: RecordType) -> Question {
        Question::new(name, qtype, RecordClass::Internet)
    }

    fn resolve(cache: &mut RrCache, q: &Question) -> (ResolveOutcome, DnsMessage) {
        let mut response = DnsMessage::new(0, false);
        let outcome = answer(cache, q, &mut response, NOW);
        (outcome, response)
    }

    #[test]
    fn test_direct_answer() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::a("host.example", Ipv4Addr::new(1, 2, 3, 4), 1000), true, NOW);
        let (outcome, response) = resolve(&mut cache, &question("host.example", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::Success);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].rdata, RData::A(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn test_cname_chain_followed() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::cname("www.example", "web.example", 1000), true, NOW);
        cache.insert(&ResourceRecord::a("web.example", Ipv4Addr::new(9, 9, 9, 9), 1000), true, NOW);
        let (outcome, response) = resolve(&mut cache, &question("www.example", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::Success);
        // both the CNAME and the target A record are in the answer
        assert_eq!(response.answers.len(), 2);
        assert!(response
            .answers
            .iter()
            .any(|rr| rr.rdata == RData::A(Ipv4Addr::new(9, 9, 9, 9))));
    }

    #[test]
    fn test_cname_without_target_is_partial() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::cname("www.example", "web.example", 1000), true, NOW);
        let (outcome, response) = resolve(&mut cache, &question("www.example", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::PartialData);
        assert_eq!(response.answers.len(), 1);
    }

    #[test]
    fn test_cname_query_not_followed() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::cname("www.example", "web.example", 1000), true, NOW);
        cache.insert(&ResourceRecord::cname("web.example", "deep.example", 1000), true, NOW);
        let (outcome, response) = resolve(&mut cache, &question("www.example", RecordType::CNAME));
        assert_eq!(outcome, ResolveOutcome::Success);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].owner, "www.example");
    }

    #[test]
    fn test_cname_cycle_terminates() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::cname("a.loop", "b.loop", 1000), true, NOW);
        cache.insert(&ResourceRecord::cname("b.loop", "a.loop", 1000), true, NOW);
        let (outcome, response) = resolve(&mut cache, &question("a.loop", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::PartialData);
        assert_eq!(response.answers.len(), 2);
    }

    #[test]
    fn test_negative_entry() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.add_negative("gone.example", RecordType::A, RecordClass::Internet, NOW + 500, true);
        let (outcome, response) = resolve(&mut cache, &question("gone.example", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::Negative);
        assert!(response.answers.is_empty());
    }

    #[test]
    fn test_ns_referral_goes_to_authority() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::ns("example.com", "ns1.example.com", 1000), true, NOW);
        let (outcome, response) =
            resolve(&mut cache, &question("unknown.sub.example.com", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::PartialData);
        assert!(response.answers.is_empty());
        assert_eq!(response.authority.len(), 1);
        assert_eq!(response.authority[0].rtype, RecordType::NS);
    }

    #[test]
    fn test_nothing_known_is_no_data() {
        let mut cache = RrCache::new(1 << 20, 1024);
        let (outcome, response) = resolve(&mut cache, &question("void.example", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::NoData);
        assert!(response.answers.is_empty());
        assert!(response.authority.is_empty());
    }

    #[test]
    fn test_expired_records_flushed_before_answering() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::a("brief.example", Ipv4Addr::new(1, 1, 1, 1), 10), true, NOW - 100);
        let (outcome, _) = resolve(&mut cache, &question("brief.example", RecordType::A));
        assert_eq!(outcome, ResolveOutcome::NoData);
    }

    #[test]
    fn test_wildcard_query_collects_everything() {
        let mut cache = RrCache::new(1 << 20, 1024);
        cache.insert(&ResourceRecord::a("multi.example", Ipv4Addr::new(1, 1, 1, 1), 1000), true, NOW);
        cache.insert(&ResourceRecord::mx("multi.example", 5, "mail.example", 1000), true, NOW);
        let (outcome, response) =
            resolve(&mut cache, &question("multi.example", RecordType::Wildcard));
        assert_eq!(outcome, ResolveOutcome::Success);
        assert_eq!(response.answers.len(), 2);
    }
}
