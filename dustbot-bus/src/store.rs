//! src/store.rs
//!
//! In-memory key/value and sorted-set storage behind the broker. Strings
//! carry an optional TTL deadline checked lazily on access and swept by a
//! periodic broker task. Sorted sets are kept ordered ascending by
//! (score, member); rank 0 is the lowest score, matching the eviction calls
//! the logger workers issue.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    strings: HashMap<String, StringEntry>,
    zsets: HashMap<String, Vec<(f64, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.strings.get(key) {
            Some(entry) if entry.expired(now) => {
                self.strings.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn set(&mut self, key: &str, value: String) {
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value,
                expires_at: None,
            },
        );
    }

    pub fn setex(&mut self, key: &str, value: String, ttl: Duration) {
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.strings.remove(key).is_some() | self.zsets.remove(key).is_some()
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.get(key).is_some() || self.zsets.contains_key(key)
    }

    pub fn keys(&mut self, pattern: &str) -> Vec<String> {
        self.purge_expired();
        let mut out: Vec<String> = self
            .strings
            .keys()
            .chain(self.zsets.keys())
            .filter(|k| glob_match(pattern, k))
            .cloned()
            .collect();
        out.sort();
        out
    }

    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.strings.retain(|_, entry| !entry.expired(now));
    }

    /// Returns true when the member was newly added (false on score update).
    pub fn zadd(&mut self, key: &str, score: f64, member: String) -> bool {
        let set = self.zsets.entry(key.to_string()).or_default();
        let new = match set.iter().position(|(_, m)| *m == member) {
            Some(idx) => {
                set.remove(idx);
                false
            }
            None => true,
        };
        let at = set.partition_point(|(s, m)| {
            s.total_cmp(&score).then_with(|| m.as_str().cmp(member.as_str()))
                == std::cmp::Ordering::Less
        });
        set.insert(at, (score, member));
        new
    }

    pub fn zcard(&self, key: &str) -> usize {
        self.zsets.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Members between `start` and `stop` (inclusive, negative counts from
    /// the end) in descending score order.
    pub fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let Some(set) = self.zsets.get(key) else {
            return Vec::new();
        };
        let Some((from, to)) = resolve_range(start, stop, set.len()) else {
            return Vec::new();
        };
        set.iter()
            .rev()
            .skip(from)
            .take(to - from + 1)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn zremrangebyrank(&mut self, key: &str, start: i64, stop: i64) -> usize {
        let Some(set) = self.zsets.get_mut(key) else {
            return 0;
        };
        let Some((from, to)) = resolve_range(start, stop, set.len()) else {
            return 0;
        };
        set.drain(from..=to);
        to - from + 1
    }

    pub fn zremrangebyscore(&mut self, key: &str, min: f64, max: f64) -> usize {
        let Some(set) = self.zsets.get_mut(key) else {
            return 0;
        };
        let before = set.len();
        set.retain(|(score, _)| *score < min || *score > max);
        before - set.len()
    }
}

/// Inclusive rank range with negative-from-the-end indices; `None` when the
/// resolved range is empty.
fn resolve_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let n = len as i64;
    if n == 0 {
        return None;
    }
    let from = (if start < 0 { n + start } else { start }).max(0);
    let to = (if stop < 0 { n + stop } else { stop }).min(n - 1);
    if from > to || from > n - 1 || to < 0 {
        return None;
    }
    Some((from as usize, to as usize))
}

/// Redis-style glob with `*` as the only wildcard.
pub fn glob_match(pattern: &str, input: &str) -> bool {
    fn inner(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], s) || (!s.is_empty() && inner(p, &s[1..])),
            (Some(c), Some(d)) if c == d => inner(&p[1..], &s[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), input.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_del() {
        let mut store = MemoryStore::new();
        store.set("k", "v".into());
        assert_eq!(store.get("k"), Some("v".into()));
        assert!(store.exists("k"));
        assert!(store.del("k"));
        assert!(!store.exists("k"));
        assert!(!store.del("k"));
    }

    #[test]
    fn setex_expires() {
        let mut store = MemoryStore::new();
        store.setex("k", "v".into(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.get("k"), None);
        assert!(!store.exists("k"));
    }

    #[test]
    fn keys_globbing() {
        let mut store = MemoryStore::new();
        store.set("user:alice", "{}".into());
        store.set("user:bob", "{}".into());
        store.set("cache:x", "{}".into());
        assert_eq!(store.keys("user:*"), vec!["user:alice", "user:bob"]);
        assert_eq!(store.keys("*"), vec!["cache:x", "user:alice", "user:bob"]);
        assert!(store.keys("nope:*").is_empty());
    }

    #[test]
    fn zadd_orders_and_updates() {
        let mut store = MemoryStore::new();
        assert!(store.zadd("z", 2.0, "b".into()));
        assert!(store.zadd("z", 1.0, "a".into()));
        assert!(store.zadd("z", 3.0, "c".into()));
        // score update, not a new member
        assert!(!store.zadd("z", 0.5, "c".into()));
        assert_eq!(store.zcard("z"), 3);
        assert_eq!(store.zrevrange("z", 0, -1), vec!["b", "a", "c"]);
    }

    #[test]
    fn zrevrange_bounds() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.zadd("z", i as f64, format!("m{i}"));
        }
        assert_eq!(store.zrevrange("z", 0, 1), vec!["m4", "m3"]);
        assert_eq!(store.zrevrange("z", 3, 99), vec!["m1", "m0"]);
        assert!(store.zrevrange("z", 9, 12).is_empty());
        assert!(store.zrevrange("missing", 0, -1).is_empty());
    }

    #[test]
    fn zremrangebyrank_drops_oldest() {
        let mut store = MemoryStore::new();
        for i in 0..10 {
            store.zadd("z", i as f64, format!("m{i}"));
        }
        // same call shape the loggers use: trim to a bound of 7
        assert_eq!(store.zremrangebyrank("z", 0, 2), 3);
        assert_eq!(store.zcard("z"), 7);
        assert_eq!(store.zrevrange("z", -1, -1), vec!["m3"]);
    }

    #[test]
    fn zremrangebyscore_inclusive() {
        let mut store = MemoryStore::new();
        for i in 0..5 {
            store.zadd("z", i as f64, format!("m{i}"));
        }
        assert_eq!(store.zremrangebyscore("z", 1.0, 3.0), 3);
        assert_eq!(store.zrevrange("z", 0, -1), vec!["m4", "m0"]);
    }
}
