//! A DNS protocol engine: wire and text codecs, a resource-record cache
//! with negative caching, user-locked entries, and LRU/TTL eviction, a
//! cache-only local resolver, zone-file and hosts-file loaders, and UDP
//! server glue.
//!
//! The cache and resolver are synchronous and single-threaded; only the
//! server loop and the query logger touch the async runtime.

pub mod cache;
pub mod config;
pub mod logging;
pub mod packet;
pub mod records;
pub mod resolver;
pub mod server;
pub mod text;
pub mod zone;

pub use cache::{EntryId, RrCache, DEREF_CNAMES};
pub use config::DnsConfig;
pub use packet::DnsMessage;
pub use records::{Question, RData, RecordClass, RecordType, ResourceRecord};
