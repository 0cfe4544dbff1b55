use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

/// A cached response: status line, a header subset, the body bytes, and the
/// expiry metadata needed to answer "still fresh?" at lookup time.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// HTTP status line, without the trailing CRLF.
    pub response_line: String,
    /// Stored header subset, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Raw response body.
    pub body: Vec<u8>,
    /// When the entry was created (epoch seconds).
    pub creation_time: i64,
    /// Absolute expiry (epoch seconds); `None` means never set.
    pub expires_time: Option<i64>,
    /// The origin demanded revalidation before reuse.
    pub requires_validation: bool,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheEntry {
    /// True when the entry may not be served without revalidation: either
    /// the origin said so outright, or the expiry instant has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.requires_validation || self.expires_time.map_or(false, |t| now > t)
    }
}

/// Thread-safe response cache with insertion-order eviction.
///
/// Lookups do not touch the eviction order; `put` of an existing key
/// re-inserts it at the front. The victim is always the tail, the key that
/// has gone longest without being (re)inserted. This is deliberately the
/// same policy as a FIFO over insertions, not a read-recency LRU.
///
/// One lock covers the entry map and the order list together, so map
/// membership and list membership never diverge.
pub struct Cache {
    max_entries: usize,
    inner: RwLock<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: OrderList,
}

/// Doubly-linked ordering over the cached keys: O(1) front insert, tail
/// evict, and middle unlink, with the links held in a hash index.
#[derive(Default)]
struct OrderList {
    links: HashMap<String, Links>,
    head: Option<String>,
    tail: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Links {
    prev: Option<String>,
    next: Option<String>,
}

impl OrderList {
    fn push_front(&mut self, key: String) {
        let old_head = self.head.replace(key.clone());
        self.links.insert(
            key.clone(),
            Links {
                prev: None,
                next: old_head.clone(),
            },
        );
        match old_head {
            Some(h) => {
                if let Some(links) = self.links.get_mut(&h) {
                    links.prev = Some(key);
                }
            }
            None => self.tail = Some(key),
        }
    }

    fn unlink(&mut self, key: &str) {
        let Some(removed) = self.links.remove(key) else {
            return;
        };
        match &removed.prev {
            Some(p) => {
                if let Some(links) = self.links.get_mut(p) {
                    links.next = removed.next.clone();
                }
            }
            None => self.head = removed.next.clone(),
        }
        match &removed.next {
            Some(n) => {
                if let Some(links) = self.links.get_mut(n) {
                    links.prev = removed.prev.clone();
                }
            }
            None => self.tail = removed.prev.clone(),
        }
    }

    fn pop_back(&mut self) -> Option<String> {
        let key = self.tail.clone()?;
        self.unlink(&key);
        Some(key)
    }
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a copy of the entry for `key`, if present. Does not touch
    /// the eviction order.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.read().entries.get(key).cloned()
    }

    /// Inserts `entry` under `key`, evicting the order-list tail first when
    /// the cache is at capacity. The key ends up at the front of the order.
    pub fn put(&self, key: impl Into<String>, entry: CacheEntry) {
        let key = key.into();
        let mut inner = self.write();
        if inner.entries.len() >= self.max_entries {
            if let Some(victim) = inner.order.pop_back() {
                inner.entries.remove(&victim);
            }
        }
        inner.entries.insert(key.clone(), entry);
        inner.order.unlink(&key);
        inner.order.push_front(key);
    }

    /// Removes the entry for `key`, if present.
    pub fn remove(&self, key: &str) {
        let mut inner = self.write();
        if inner.entries.remove(key).is_some() {
            inner.order.unlink(key);
        }
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.order = OrderList::default();
    }

    /// Number of entries currently stored.
    pub fn size(&self) -> usize {
        self.read().entries.len()
    }

    /// Combined lookup and expiry check.
    pub fn is_valid(&self, key: &str) -> bool {
        self.get(key).map_or(false, |e| !e.is_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: &str) -> CacheEntry {
        CacheEntry {
            response_line: "HTTP/1.1 200 OK".to_string(),
            body: tag.as_bytes().to_vec(),
            creation_time: 1_700_000_000,
            ..CacheEntry::default()
        }
    }

    /// Walks the order list both ways and checks it against the entry map.
    fn assert_consistent(cache: &Cache) {
        let inner = cache.read();
        assert_eq!(
            inner.entries.len(),
            inner.order.links.len(),
            "every map key must have exactly one order node"
        );
        // Forward walk from head reaches every node exactly once.
        let mut seen = 0;
        let mut prev: Option<&str> = None;
        let mut cursor = inner.order.head.as_deref();
        while let Some(key) = cursor {
            let links = inner.order.links.get(key).expect("node for key");
            assert!(inner.entries.contains_key(key), "order node without entry");
            assert_eq!(links.prev.as_deref(), prev, "prev link broken at {key}");
            seen += 1;
            prev = Some(key);
            cursor = links.next.as_deref();
        }
        assert_eq!(seen, inner.order.links.len(), "forward walk missed nodes");
        assert_eq!(inner.order.tail.as_deref(), prev, "tail must end the walk");
    }

    #[test]
    fn test_get_returns_inserted_entry() {
        let cache = Cache::new(4);
        cache.put("k", entry("a"));
        let got = cache.get("k").expect("entry present");
        assert_eq!(got.body, b"a");
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let cache = Cache::new(3);
        for i in 0..10 {
            cache.put(format!("k{i}"), entry("x"));
            assert!(cache.size() <= 3);
            assert_consistent(&cache);
        }
    }

    #[test]
    fn test_eviction_drops_oldest_insertion() {
        let cache = Cache::new(3);
        cache.put("k1", entry("1"));
        cache.put("k2", entry("2"));
        cache.put("k3", entry("3"));
        cache.put("k4", entry("4"));
        assert!(cache.get("k1").is_none(), "oldest insertion evicted");
        for k in ["k2", "k3", "k4"] {
            assert!(cache.get(k).is_some(), "{k} should survive");
        }
        assert_consistent(&cache);
    }

    #[test]
    fn test_get_does_not_protect_from_eviction() {
        let cache = Cache::new(2);
        cache.put("k1", entry("1"));
        cache.put("k2", entry("2"));
        // A read does not promote k1; it is still the eviction victim.
        assert!(cache.get("k1").is_some());
        cache.put("k3", entry("3"));
        assert!(cache.get("k1").is_none());
        assert_consistent(&cache);
    }

    #[test]
    fn test_reinsert_moves_key_to_front() {
        let cache = Cache::new(2);
        cache.put("k1", entry("1"));
        cache.put("k2", entry("2"));
        cache.put("k1", entry("1b"));
        cache.put("k3", entry("3"));
        // k2 is now the tail, not k1.
        assert!(cache.get("k2").is_none());
        assert_eq!(cache.get("k1").expect("k1 survives").body, b"1b");
        assert_consistent(&cache);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = Cache::new(4);
        cache.put("k1", entry("1"));
        cache.put("k2", entry("2"));
        cache.remove("k1");
        assert!(cache.get("k1").is_none());
        assert_eq!(cache.size(), 1);
        assert_consistent(&cache);
        cache.remove("never-there");
        assert_consistent(&cache);
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert_consistent(&cache);
    }

    #[test]
    fn test_remove_middle_keeps_links_intact() {
        let cache = Cache::new(4);
        cache.put("k1", entry("1"));
        cache.put("k2", entry("2"));
        cache.put("k3", entry("3"));
        cache.remove("k2");
        assert_consistent(&cache);
        cache.put("k4", entry("4"));
        cache.put("k5", entry("5"));
        // Capacity 4: k1 (the tail) is evicted next.
        assert!(cache.get("k1").is_none());
        assert_consistent(&cache);
    }

    #[test]
    fn test_expiry_rules() {
        let now = 1_700_000_000;
        let mut e = entry("x");
        assert!(!e.is_expired_at(now), "no expiry set means not expired");

        e.expires_time = Some(now + 10);
        assert!(!e.is_expired_at(now));
        assert!(e.is_expired_at(now + 11));

        e.requires_validation = true;
        assert!(
            e.is_expired_at(now),
            "requires_validation expires regardless of time"
        );
    }

    #[test]
    fn test_is_valid_combines_lookup_and_expiry() {
        let cache = Cache::new(4);
        assert!(!cache.is_valid("k"));
        cache.put("k", entry("x"));
        assert!(cache.is_valid("k"));
        let stale = CacheEntry {
            requires_validation: true,
            ..entry("y")
        };
        cache.put("s", stale);
        assert!(!cache.is_valid("s"));
    }
}
