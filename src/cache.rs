//! Resource-record cache.
//!
//! For each owner name the cache keeps a list of records, indexed three
//! ways: a hash map from the folded owner name, an expiry-ordered set for
//! TTL eviction, and an LRU list for size-pressure eviction. Entries can be
//! locked against eviction, marked as user-supplied (unassailable local
//! data), or negative (recording the confirmed absence of data).
//!
//! The cache is a single-threaded resource; callers that keep a returned
//! [`EntryId`] across mutating calls must `lock` it first or copy the
//! record out.

use std::collections::{BTreeSet, VecDeque};
use std::net::Ipv4Addr;

use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::records::{fold_owner, parent_name, RData, RecordClass, RecordType, ResourceRecord};

/// Follow CNAME records when looking up a single record.
pub const DEREF_CNAMES: u8 = 1 << 0;

/// Stable handle to a cache entry. Generational: once the entry dies the
/// handle stops resolving instead of pointing at recycled storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

struct Entry {
    rr: ResourceRecord,
    /// Absolute expiry, seconds since the epoch.
    expire_time: u64,
    byte_size: u64,
    lock_count: u32,
    /// Whether the record came from a server claiming authority (AA bit).
    is_authoritative: bool,
    /// User-supplied records are treated as completely authoritative and
    /// are never evicted or replaced.
    is_from_user: bool,
    /// Negative entries record the absence of data for their expiry.
    is_negative: bool,
    /// Removed from every index but still counted against the size budget
    /// because a lock prevents freeing. Freed when the lock count hits 0.
    is_deprecated: bool,
    lru_prev: Option<EntryId>,
    lru_next: Option<EntryId>,
}

impl Entry {
    /// Discardable entries, and only they, live in the LRU list and the
    /// expiry set.
    fn is_discardable(&self) -> bool {
        self.lock_count == 0 && !self.is_from_user && !self.is_deprecated
    }
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

pub struct RrCache {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Folded owner name -> entries living at that owner.
    owners: FxHashMap<String, Vec<EntryId>>,
    /// Discardable entries ordered by expiry; the id breaks ties.
    by_expiry: BTreeSet<(u64, EntryId)>,
    lru_first: Option<EntryId>,
    lru_last: Option<EntryId>,
    num_bytes_used: u64,
    num_records: u32,
    max_bytes: u64,
    max_records: u32,
    round_robin: bool,
}

fn entry_byte_size(rr: &ResourceRecord) -> u64 {
    let strings = rr.owner.len()
        + match &rr.rdata {
            RData::NS(name) | RData::CNAME(name) | RData::PTR(name) => name.len(),
            RData::MX { exchange, .. } => exchange.len(),
            RData::HINFO { cpu, os } => cpu.len() + os.len(),
            RData::SOA { mname, rname, .. } => mname.len() + rname.len(),
            RData::TXT(text) => text.len(),
            RData::A(_) | RData::AAAA(_) | RData::Wildcard => 0,
        };
    std::mem::size_of::<Entry>() as u64 + strings as u64
}

impl RrCache {
    /// Create an empty cache bounded by `max_bytes` of record data and
    /// `max_records` entries. Round-robin selection starts enabled.
    pub fn new(max_bytes: u64, max_records: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            owners: FxHashMap::default(),
            by_expiry: BTreeSet::new(),
            lru_first: None,
            lru_last: None,
            num_bytes_used: 0,
            num_records: 0,
            max_bytes,
            max_records,
            round_robin: true,
        }
    }

    /// Set whether lookups randomize among equivalent records to support
    /// round-robin DNS.
    pub fn set_round_robin(&mut self, round_robin: bool) {
        self.round_robin = round_robin;
    }

    pub fn len(&self) -> u32 {
        self.num_records
    }

    pub fn is_empty(&self) -> bool {
        self.num_records == 0
    }

    pub fn bytes_used(&self) -> u64 {
        self.num_bytes_used
    }

    /// Borrow the record behind a handle. Returns `None` once the entry has
    /// been freed (the handle outlived a mutation without a lock).
    pub fn record(&self, id: EntryId) -> Option<&ResourceRecord> {
        self.entry(id).map(|e| &e.rr)
    }

    // --- arena plumbing ---

    fn entry(&self, id: EntryId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn slot(&self, id: EntryId) -> &Entry {
        self.entry(id).expect("stale cache entry id")
    }

    fn slot_mut(&mut self, id: EntryId) -> &mut Entry {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .expect("stale cache entry id");
        slot.entry.as_mut().expect("stale cache entry id")
    }

    fn alloc(&mut self, entry: Entry) -> EntryId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            EntryId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            EntryId {
                index: (self.slots.len() - 1) as u32,
                generation: 0,
            }
        }
    }

    /// Drop the entry and its accounting; the slot is recycled under a new
    /// generation so outstanding handles stop resolving.
    fn release(&mut self, id: EntryId) {
        let byte_size = self.slot(id).byte_size;
        self.num_bytes_used -= byte_size;
        self.num_records -= 1;
        let slot = &mut self.slots[id.index as usize];
        slot.entry = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
    }

    // --- index plumbing ---

    fn lru_prepend(&mut self, id: EntryId) {
        let old_first = self.lru_first;
        {
            let entry = self.slot_mut(id);
            entry.lru_prev = None;
            entry.lru_next = old_first;
        }
        match old_first {
            Some(first) => self.slot_mut(first).lru_prev = Some(id),
            None => self.lru_last = Some(id),
        }
        self.lru_first = Some(id);
    }

    fn lru_unlink(&mut self, id: EntryId) {
        let (prev, next) = {
            let entry = self.slot(id);
            (entry.lru_prev, entry.lru_next)
        };
        match prev {
            Some(p) => self.slot_mut(p).lru_next = next,
            None => self.lru_first = next,
        }
        match next {
            Some(n) => self.slot_mut(n).lru_prev = prev,
            None => self.lru_last = prev,
        }
        let entry = self.slot_mut(id);
        entry.lru_prev = None;
        entry.lru_next = None;
    }

    fn remove_from_owner(&mut self, id: EntryId) {
        let key = fold_owner(&self.slot(id).rr.owner);
        if let Some(ids) = self.owners.get_mut(&key) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.owners.remove(&key);
            }
        }
    }

    /// Move an entry in the expiry set when its expiry changes.
    fn set_expire_time(&mut self, id: EntryId, expire_time: u64) {
        let (old, discardable) = {
            let entry = self.slot(id);
            (entry.expire_time, entry.is_discardable())
        };
        if discardable {
            self.by_expiry.remove(&(old, id));
        }
        self.slot_mut(id).expire_time = expire_time;
        if discardable {
            self.by_expiry.insert((expire_time, id));
        }
    }

    /// Remove a conflict loser from every index. Locked losers are
    /// deprecated (still counted, freed on final unlock); unlocked losers
    /// are freed outright.
    fn discard(&mut self, id: EntryId) {
        let (locked, discardable, expire) = {
            let entry = self.slot(id);
            (entry.lock_count > 0, entry.is_discardable(), entry.expire_time)
        };
        if discardable {
            self.lru_unlink(id);
            self.by_expiry.remove(&(expire, id));
        }
        self.remove_from_owner(id);
        if locked {
            self.slot_mut(id).is_deprecated = true;
        } else {
            self.release(id);
        }
    }

    /// Evict least-recently-used discardable entries until the requested
    /// headroom fits. Stops early when only locked or user entries remain,
    /// leaving the limits exceeded.
    fn ensure_space(&mut self, extra_records: u32, extra_bytes: u64) {
        while let Some(victim) = self.lru_last {
            if self.num_bytes_used + extra_bytes <= self.max_bytes
                && self.num_records + extra_records <= self.max_records
            {
                break;
            }
            let expire = self.slot(victim).expire_time;
            self.lru_unlink(victim);
            self.by_expiry.remove(&(expire, victim));
            self.remove_from_owner(victim);
            self.release(victim);
        }
    }

    fn index_new_entry(&mut self, entry: Entry) -> EntryId {
        let key = fold_owner(&entry.rr.owner);
        let expire_time = entry.expire_time;
        let byte_size = entry.byte_size;
        let id = self.alloc(entry);
        self.num_bytes_used += byte_size;
        self.num_records += 1;
        self.owners.entry(key).or_default().push(id);
        self.by_expiry.insert((expire_time, id));
        self.lru_prepend(id);
        id
    }

    // --- public operations ---

    /// Insert a record, resolving conflicts against what the owner already
    /// holds. Identical data extends the existing entry; multi-valued types
    /// (A, AAAA, NS) accumulate; single-valued types are rewritten in
    /// place. The cache keeps its own copy of `record`.
    ///
    /// Returns a handle to the record now in the cache; call [`Self::lock`]
    /// on it to keep it across later mutations.
    pub fn insert(
        &mut self,
        record: &ResourceRecord,
        is_authoritative: bool,
        now: u64,
    ) -> EntryId {
        assert!(
            record.rtype != RecordType::Wildcard,
            "wildcard records cannot be inserted"
        );
        let byte_size = entry_byte_size(record);
        self.ensure_space(1, byte_size);

        let key = fold_owner(&record.owner);
        let ids: Vec<EntryId> = self.owners.get(&key).cloned().unwrap_or_default();
        for id in ids {
            let Some(entry) = self.entry(id) else { continue };
            let e_type = entry.rr.rtype;
            let e_class = entry.rr.class;
            let negative = entry.is_negative;
            let authoritative = entry.is_authoritative;
            let from_user = entry.is_from_user;
            let same_data = entry.rr.rdata == record.rdata;
            let same_key = e_type == record.rtype && e_class == record.class;

            if negative {
                if !same_key {
                    continue;
                }
                // A negative entry of equal or greater authority rejects
                // the positive arrival; otherwise the positive replaces it.
                if authoritative && !is_authoritative {
                    return id;
                }
                self.discard(id);
                continue;
            }

            // A CNAME conflicts with every other positive type at the owner.
            let cname_conflict = e_class == record.class
                && !same_key
                && (e_type == RecordType::CNAME || record.rtype == RecordType::CNAME);
            if cname_conflict {
                if from_user {
                    return id;
                }
                self.discard(id);
                continue;
            }

            if !same_key {
                continue;
            }

            if same_data {
                if from_user {
                    return id;
                }
                if is_authoritative {
                    self.slot_mut(id).is_authoritative = true;
                }
                let new_expire = now.saturating_add(record.ttl as u64);
                if self.slot(id).expire_time < new_expire {
                    self.set_expire_time(id, new_expire);
                }
                self.check_invariants();
                return id;
            }

            match record.rtype {
                // multi-valued: differing data coexists
                RecordType::A | RecordType::AAAA | RecordType::NS => continue,
                _ => {
                    // single-valued: rewrite the stored data in place.
                    // Holders of unlocked handles observe the new data.
                    if from_user {
                        return id;
                    }
                    let new_size = entry_byte_size(record);
                    let old_size = self.slot(id).byte_size;
                    self.num_bytes_used = self.num_bytes_used - old_size + new_size;
                    {
                        let entry = self.slot_mut(id);
                        entry.rr.rdata = record.rdata.clone();
                        entry.rr.ttl = record.ttl;
                        entry.byte_size = new_size;
                        if is_authoritative {
                            entry.is_authoritative = true;
                        }
                    }
                    self.set_expire_time(id, now.saturating_add(record.ttl as u64));
                    self.check_invariants();
                    return id;
                }
            }
        }

        let id = self.index_new_entry(Entry {
            rr: record.clone(),
            expire_time: now.saturating_add(record.ttl as u64),
            byte_size,
            lock_count: 0,
            is_authoritative,
            is_from_user: false,
            is_negative: false,
            is_deprecated: false,
            lru_prev: None,
            lru_next: None,
        });
        self.check_invariants();
        id
    }

    /// Record that the given `(owner, type, class)` has no data until
    /// `expire_time`. An existing negative entry for the type has its
    /// expiry extended. A conflicting positive entry is converted only when
    /// the negative is strictly more authoritative; ties go to the positive
    /// record, and user-supplied entries always survive.
    pub fn add_negative(
        &mut self,
        owner: &str,
        qtype: RecordType,
        qclass: RecordClass,
        expire_time: u64,
        is_authoritative: bool,
    ) {
        let key = fold_owner(owner);
        let ids: Vec<EntryId> = self.owners.get(&key).cloned().unwrap_or_default();
        for id in ids {
            let Some(entry) = self.entry(id) else { continue };
            if entry.is_negative {
                if entry.rr.rtype == qtype {
                    if expire_time > entry.expire_time {
                        self.set_expire_time(id, expire_time);
                    }
                    return;
                }
                continue;
            }
            let conflict =
                entry.rr.rtype == qtype || entry.rr.rtype == RecordType::CNAME;
            if !conflict {
                continue;
            }
            if entry.is_from_user || !is_authoritative || entry.is_authoritative {
                // not more authoritative than what we hold; drop silently
                return;
            }
            let rr = ResourceRecord {
                owner: entry.rr.owner.clone(),
                rtype: qtype,
                class: qclass,
                ttl: 0,
                rdata: RData::Wildcard,
            };
            let new_size = entry_byte_size(&rr);
            let old_size = self.slot(id).byte_size;
            self.num_bytes_used = self.num_bytes_used - old_size + new_size;
            {
                let entry = self.slot_mut(id);
                entry.rr = rr;
                entry.byte_size = new_size;
                entry.is_negative = true;
                entry.is_authoritative = true;
            }
            self.set_expire_time(id, expire_time);
            self.check_invariants();
            return;
        }

        let rr = ResourceRecord {
            owner: owner.to_string(),
            rtype: qtype,
            class: qclass,
            ttl: 0,
            rdata: RData::Wildcard,
        };
        let byte_size = entry_byte_size(&rr);
        self.ensure_space(1, byte_size);
        self.index_new_entry(Entry {
            rr,
            expire_time,
            byte_size,
            lock_count: 0,
            is_authoritative,
            is_from_user: false,
            is_negative: true,
            is_deprecated: false,
            lru_prev: None,
            lru_next: None,
        });
        self.check_invariants();
    }

    /// All positive records at `owner` matching the query type and class.
    /// Negative entries are filtered out and CNAMEs are not followed.
    pub fn lookup_list(
        &self,
        owner: &str,
        qtype: RecordType,
        qclass: RecordClass,
    ) -> Vec<EntryId> {
        let key = fold_owner(owner);
        let mut out = Vec::new();
        if let Some(ids) = self.owners.get(&key) {
            for &id in ids {
                if let Some(entry) = self.entry(id) {
                    if !entry.is_negative && entry.rr.matches_query(qtype, qclass) {
                        out.push(id);
                    }
                }
            }
        }
        out
    }

    /// Find one record matching the query. With [`DEREF_CNAMES`] the lookup
    /// follows CNAME hops (guarding against cycles) until a matching record
    /// or a dead end. When round-robin is enabled and several records match
    /// at the terminal owner, one is chosen uniformly at random; otherwise
    /// the first encountered wins.
    pub fn lookup_one(
        &self,
        owner: &str,
        qtype: RecordType,
        qclass: RecordClass,
        flags: u8,
    ) -> Option<EntryId> {
        let mut pending = VecDeque::new();
        let mut visited = FxHashSet::default();
        let start = fold_owner(owner);
        visited.insert(start.clone());
        pending.push_back(start);

        let mut candidates = Vec::new();
        while let Some(name) = pending.pop_front() {
            let Some(ids) = self.owners.get(&name) else { continue };
            for &id in ids {
                let Some(entry) = self.entry(id) else { continue };
                if entry.is_negative {
                    continue;
                }
                if entry.rr.matches_query(qtype, qclass) {
                    if !self.round_robin {
                        return Some(id);
                    }
                    candidates.push(id);
                } else if flags & DEREF_CNAMES != 0 && entry.rr.rtype == RecordType::CNAME {
                    if let RData::CNAME(target) = &entry.rr.rdata {
                        let target_key = fold_owner(target);
                        if visited.insert(target_key.clone()) {
                            pending.push_back(target_key);
                        }
                    }
                }
            }
        }

        match candidates.len() {
            0 => None,
            1 => Some(candidates[0]),
            n => Some(candidates[rand::rng().random_range(0..n)]),
        }
    }

    /// Whether an explicit negative entry covers `(owner, qtype, qclass)`.
    /// A negative entry with wildcard type or class satisfies any query.
    pub fn is_negative(&self, owner: &str, qtype: RecordType, qclass: RecordClass) -> bool {
        let key = fold_owner(owner);
        let Some(ids) = self.owners.get(&key) else {
            return false;
        };
        ids.iter().any(|&id| {
            self.entry(id).is_some_and(|entry| {
                entry.is_negative
                    && (entry.rr.rtype == RecordType::Wildcard || entry.rr.rtype == qtype)
                    && (entry.rr.class == RecordClass::Wildcard || entry.rr.class == qclass)
            })
        })
    }

    /// Raise the lock count, removing the entry from the eviction indices.
    /// Locked entries survive expiry and size pressure until unlocked.
    pub fn lock(&mut self, id: EntryId) {
        let (discardable, expire) = {
            let entry = self.slot(id);
            (entry.is_discardable(), entry.expire_time)
        };
        self.slot_mut(id).lock_count += 1;
        if discardable {
            self.lru_unlink(id);
            self.by_expiry.remove(&(expire, id));
        }
        self.check_invariants();
    }

    /// Drop one lock. At zero the entry rejoins the eviction indices,
    /// unless it is deprecated or the cache is over quota, in which case it
    /// is freed immediately.
    pub fn unlock(&mut self, id: EntryId) {
        {
            let entry = self.slot_mut(id);
            assert!(entry.lock_count > 0, "unlock of unlocked cache entry");
            entry.lock_count -= 1;
            if entry.lock_count > 0 {
                return;
            }
        }
        let deprecated = self.slot(id).is_deprecated;
        if deprecated
            || self.num_records > self.max_records
            || self.num_bytes_used > self.max_bytes
        {
            if !deprecated {
                self.remove_from_owner(id);
            }
            self.release(id);
        } else {
            let expire = self.slot(id).expire_time;
            self.by_expiry.insert((expire, id));
            self.lru_prepend(id);
        }
        self.check_invariants();
    }

    /// Mark a record as user-supplied: locked in and used no matter what
    /// other authorities say. Used for /etc/hosts and zone-file data.
    pub fn mark_user(&mut self, id: EntryId) {
        if self.slot(id).is_from_user {
            return;
        }
        self.lock(id);
        self.slot_mut(id).is_from_user = true;
        self.check_invariants();
    }

    /// Undo [`Self::mark_user`].
    pub fn unmark_user(&mut self, id: EntryId) {
        {
            let entry = self.slot_mut(id);
            if !entry.is_from_user {
                return;
            }
            entry.is_from_user = false;
        }
        self.unlock(id);
    }

    /// Evict every discardable entry that has expired by `now`, then evict
    /// least-recently-used entries while over quota. Locked, user, and
    /// deprecated entries are untouched, so the quota can stay exceeded.
    pub fn flush(&mut self, now: u64) {
        while let Some(&(expire, id)) = self.by_expiry.iter().next() {
            if expire > now {
                break;
            }
            self.by_expiry.remove(&(expire, id));
            self.lru_unlink(id);
            self.remove_from_owner(id);
            self.release(id);
        }
        self.ensure_space(0, 0);
        self.check_invariants();
    }

    /// Look up the IPv4 address of a name, following CNAMEs.
    pub fn get_addr(&self, name: &str) -> Option<Ipv4Addr> {
        let id = self.lookup_one(
            name,
            RecordType::A,
            RecordClass::Internet,
            DEREF_CNAMES,
        )?;
        match &self.entry(id)?.rr.rdata {
            RData::A(ip) => Some(*ip),
            _ => None,
        }
    }

    /// Find a name server for `host` by walking up the owner hierarchy one
    /// label at a time, returning the first NS whose own address is also in
    /// the cache.
    pub fn get_ns_addr(&self, host: &str) -> Option<(String, Ipv4Addr)> {
        let mut name = fold_owner(host);
        loop {
            for id in self.lookup_list(&name, RecordType::NS, RecordClass::Internet) {
                let Some(entry) = self.entry(id) else { continue };
                if let RData::NS(server) = &entry.rr.rdata {
                    if let Some(ip) = self.get_addr(server) {
                        return Some((server.clone(), ip));
                    }
                }
            }
            name = parent_name(&name)?.to_string();
        }
    }

    /// Validate the cache invariants. Only active in debug builds; a
    /// violation is a bug in the cache itself, so it panics.
    fn check_invariants(&self) {
        if !cfg!(debug_assertions) {
            return;
        }
        let mut total = 0u32;
        let mut bytes = 0u64;
        let mut discardable = 0usize;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(entry) = &slot.entry else { continue };
            total += 1;
            bytes += entry.byte_size;
            let id = EntryId {
                index: index as u32,
                generation: slot.generation,
            };
            let key = fold_owner(&entry.rr.owner);
            let owner_refs = self
                .owners
                .get(&key)
                .map_or(0, |ids| ids.iter().filter(|&&other| other == id).count());
            if entry.is_deprecated {
                assert_eq!(owner_refs, 0, "deprecated entry still in owner index");
                assert!(
                    !self.by_expiry.contains(&(entry.expire_time, id)),
                    "deprecated entry still in expiry set"
                );
            } else {
                assert_eq!(owner_refs, 1, "entry not in its owner list exactly once");
                if entry.is_discardable() {
                    discardable += 1;
                    assert!(
                        self.by_expiry.contains(&(entry.expire_time, id)),
                        "discardable entry missing from expiry set"
                    );
                } else {
                    assert!(
                        !self.by_expiry.contains(&(entry.expire_time, id)),
                        "pinned entry present in expiry set"
                    );
                }
            }
        }
        assert_eq!(total, self.num_records, "record count out of sync");
        assert_eq!(bytes, self.num_bytes_used, "byte accounting out of sync");
        assert_eq!(self.by_expiry.len(), discardable);

        let mut chain = 0usize;
        let mut prev = None;
        let mut at = self.lru_first;
        while let Some(id) = at {
            let entry = self.slot(id);
            assert!(entry.is_discardable(), "non-discardable entry in LRU list");
            assert_eq!(entry.lru_prev, prev, "LRU back-link broken");
            prev = at;
            at = entry.lru_next;
            chain += 1;
        }
        assert_eq!(self.lru_last, prev, "LRU tail out of sync");
        assert_eq!(chain, discardable, "LRU population out of sync");
    }
}
