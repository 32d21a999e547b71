//! DNS answer cache with TTL-based expiration.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::dns::{CacheKey, DnsRecord};

struct CacheEntry {
    records: Vec<DnsRecord>,
    expires_at: Instant,
    seq: u64,
}

/// Entries plus an index ordered by expiry.
///
/// `seq` keeps index keys unique when two entries expire at the same
/// instant. Every entry has exactly one index slot.
#[derive(Default)]
struct Entries {
    map: FxHashMap<CacheKey, CacheEntry>,
    expiry: BTreeMap<(Instant, u64), CacheKey>,
    next_seq: u64,
}

impl Entries {
    fn insert(&mut self, key: CacheKey, records: Vec<DnsRecord>, expires_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.expiry.insert((expires_at, seq), key.clone());
        let entry = CacheEntry {
            records,
            expires_at,
            seq,
        };
        if let Some(old) = self.map.insert(key, entry) {
            self.expiry.remove(&(old.expires_at, old.seq));
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(old) = self.map.remove(key) {
            self.expiry.remove(&(old.expires_at, old.seq));
        }
    }

    /// Remove the entry closest to expiry, if it expires before `deadline`.
    fn pop_soonest(&mut self, deadline: Option<Instant>) -> bool {
        let Some(entry) = self.expiry.first_entry() else {
            return false;
        };
        if deadline.is_some_and(|d| entry.key().0 > d) {
            return false;
        }

        let key = entry.remove();
        self.map.remove(&key);
        true
    }
}

/// TTL-based DNS cache keyed by question.
///
/// Expired entries are never returned. They are dropped when a read finds
/// them, by [`DnsCache::purge_expired`], or when an insert needs room.
pub struct DnsCache {
    entries: RwLock<Entries>,
    /// Zero means unbounded.
    max_entries: usize,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a cache holding at most `max_entries` answers (0 = unbounded).
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            max_entries,
        }
    }

    /// Look up cached records, with TTLs lowered to the time remaining.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<DnsRecord>> {
        let now = Instant::now();

        {
            let Ok(entries) = self.entries.read() else {
                return None;
            };
            match entries.map.get(key) {
                None => return None,
                Some(entry) if now < entry.expires_at => {
                    let remaining = remaining_secs(entry.expires_at - now);
                    return Some(
                        entry
                            .records
                            .iter()
                            .map(|r| DnsRecord {
                                ttl: r.ttl.min(remaining),
                                ..r.clone()
                            })
                            .collect(),
                    );
                }
                Some(_) => {}
            }
        }

        let Ok(mut entries) = self.entries.write() else {
            return None;
        };
        // Re-check: another writer may have refreshed the entry meanwhile.
        if entries.map.get(key).is_some_and(|e| now >= e.expires_at) {
            entries.remove(key);
        }
        None
    }

    /// Store records for `ttl_secs` seconds. Empty sets and zero TTLs are ignored.
    ///
    /// A full cache makes room by dropping the entry closest to expiry,
    /// which is an expired one whenever any exist.
    pub fn put(&self, key: CacheKey, records: Vec<DnsRecord>, ttl_secs: u32) {
        if ttl_secs == 0 || records.is_empty() {
            return;
        }

        let now = Instant::now();
        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        if self.max_entries > 0 && !entries.map.contains_key(&key) {
            while entries.map.len() >= self.max_entries && entries.pop_soonest(None) {}
        }

        entries.insert(key, records, now + Duration::from_secs(u64::from(ttl_secs)));
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };

        let mut purged = 0;
        while entries.pop_soonest(Some(now)) {
            purged += 1;
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

fn remaining_secs(remaining: Duration) -> u32 {
    u32::try_from(remaining.as_secs()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{CLASS_IN, DnsQuestion, TYPE_A};

    fn key(name: &str) -> CacheKey {
        CacheKey::from_question(&DnsQuestion {
            name: name.to_string(),
            qtype: TYPE_A,
            qclass: CLASS_IN,
        })
    }

    fn a_record(name: &str, ttl: u32) -> DnsRecord {
        DnsRecord {
            name: name.to_string(),
            rtype: TYPE_A,
            class: CLASS_IN,
            ttl,
            rdata: vec![93, 184, 216, 34],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn get_returns_until_ttl_elapses() {
        let cache = DnsCache::new();
        cache.put(key("example.com"), vec![a_record("example.com", 300)], 300);

        tokio::time::advance(Duration::from_secs(1)).await;
        let hit = cache.get(&key("example.com")).unwrap();
        assert_eq!(hit[0].rdata, vec![93, 184, 216, 34]);
        assert_eq!(hit[0].ttl, 299);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get(&key("example.com")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_just_after_ttl() {
        let cache = DnsCache::new();
        cache.put(key("example.com"), vec![a_record("example.com", 5)], 5);

        tokio::time::advance(Duration::from_millis(5_001)).await;

        assert!(cache.get(&key("example.com")).is_none());
    }

    #[test]
    fn get_missing_returns_none() {
        let cache = DnsCache::new();

        assert!(cache.get(&key("example.com")).is_none());
    }

    #[test]
    fn put_ignores_zero_ttl_and_empty_sets() {
        let cache = DnsCache::new();

        cache.put(key("zero.com"), vec![a_record("zero.com", 0)], 0);
        cache.put(key("empty.com"), Vec::new(), 300);

        assert!(cache.is_empty());
    }

    #[test]
    fn put_replaces_existing_entry() {
        let cache = DnsCache::new();
        cache.put(key("example.com"), vec![a_record("example.com", 60)], 60);

        let mut record = a_record("example.com", 60);
        record.rdata = vec![10, 0, 0, 1];
        cache.put(key("example.com"), vec![record], 60);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key("example.com")).unwrap()[0].rdata, vec![10, 0, 0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_only_stale_entries() {
        let cache = DnsCache::new();
        cache.put(key("short.com"), vec![a_record("short.com", 10)], 10);
        cache.put(key("long.com"), vec![a_record("long.com", 100)], 100);

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("long.com")).is_some());
    }

    #[test]
    fn bounded_cache_evicts_soonest_expiring() {
        let cache = DnsCache::with_capacity(2);
        cache.put(key("a.com"), vec![a_record("a.com", 10)], 10);
        cache.put(key("b.com"), vec![a_record("b.com", 1000)], 1000);
        cache.put(key("c.com"), vec![a_record("c.com", 500)], 500);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a.com")).is_none());
        assert!(cache.get(&key("b.com")).is_some());
        assert!(cache.get(&key("c.com")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_drops_expired_entries_first() {
        let cache = DnsCache::with_capacity(2);
        cache.put(key("a.com"), vec![a_record("a.com", 10)], 10);
        cache.put(key("b.com"), vec![a_record("b.com", 1000)], 1000);

        tokio::time::advance(Duration::from_secs(11)).await;
        cache.put(key("c.com"), vec![a_record("c.com", 5)], 5);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("b.com")).is_some());
        assert!(cache.get(&key("c.com")).is_some());
    }

    #[test]
    fn replaced_entry_is_evicted_by_its_new_expiry() {
        let cache = DnsCache::with_capacity(2);
        cache.put(key("a.com"), vec![a_record("a.com", 10)], 10);
        cache.put(key("a.com"), vec![a_record("a.com", 1000)], 1000);
        cache.put(key("b.com"), vec![a_record("b.com", 500)], 500);
        cache.put(key("c.com"), vec![a_record("c.com", 600)], 600);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a.com")).is_some());
        assert!(cache.get(&key("b.com")).is_none());
        assert!(cache.get(&key("c.com")).is_some());
    }

    #[test]
    fn full_cache_stays_at_capacity() {
        let cache = DnsCache::with_capacity(100);
        for i in 0..1000u32 {
            let name = format!("host{i}.com");
            cache.put(key(&name), vec![a_record(&name, 60 + i)], 60 + i);
        }

        assert_eq!(cache.len(), 100);
        assert!(cache.get(&key("host999.com")).is_some());
        assert!(cache.get(&key("host899.com")).is_none());
    }
}
