//! Time-aware series cache shared by the stateful processors.
//!
//! Entries are keyed by a 64-bit fingerprint of the series identity. The
//! identity string is stored alongside and verified on lookup, so a
//! fingerprint collision degrades to a cache miss instead of silently
//! corrupting a derived value. Sweeps run at `period` cadence and drop
//! entries untouched for `retention`.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;
use xxhash_rust::xxh64::xxh64;

/// One cached sample.
pub struct Entry<T> {
    /// Full series identity backing the fingerprint.
    pub ident: String,
    /// Measurement timestamp in Unix nanoseconds.
    pub stamp: i64,
    pub value: T,
}

/// Fingerprint + TTL cache. Owned exclusively by one processor; never
/// shared across threads.
pub struct TtlCache<T> {
    entries: HashMap<u64, Entry<T>>,
    period: Duration,
    retention: Duration,
    last_cleared: Option<Instant>,
}

impl<T> TtlCache<T> {
    pub fn new(period: Duration, retention: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            period,
            retention,
            last_cleared: None,
        }
    }

    /// Called once per apply: starts the sweep clock on first use, then
    /// evicts expired entries whenever a full period has elapsed.
    pub fn maybe_sweep(&mut self) {
        let now = Instant::now();
        match self.last_cleared {
            None => {
                self.last_cleared = Some(now);
            }
            Some(last) if now >= last + self.period => {
                let cutoff = unix_nanos().saturating_sub(self.retention.as_nanos() as i64);
                let before = self.entries.len();
                self.entries.retain(|_, entry| entry.stamp >= cutoff);
                debug!(
                    removed = before - self.entries.len(),
                    remaining = self.entries.len(),
                    "cache sweep",
                );
                self.last_cleared = Some(now);
            }
            Some(_) => {}
        }
    }

    /// Look up an entry, treating an identity mismatch as a miss.
    pub fn get(&self, key: u64, ident: &str) -> Option<&Entry<T>> {
        self.entries.get(&key).filter(|e| e.ident == ident)
    }

    pub fn insert(&mut self, key: u64, ident: String, stamp: i64, value: T) {
        self.entries.insert(
            key,
            Entry {
                ident,
                stamp,
                value,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Series fingerprint over a field name and the measurement's tags in
/// insertion order. Returns the hash and the identity string behind it.
pub fn series_fingerprint(field: &str, tags: &[(String, String)]) -> (u64, String) {
    let mut ident = String::with_capacity(field.len() + tags.len() * 16);
    ident.push_str(field);
    for (k, v) in tags {
        ident.push_str(k);
        ident.push_str(v);
    }
    (xxh64(ident.as_bytes(), 0), ident)
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fingerprint_depends_on_field_and_tags() {
        let t = tags(&[("device", "r1"), ("if", "ge-0")]);
        let (a, _) = series_fingerprint("in_octets", &t);
        let (b, _) = series_fingerprint("out_octets", &t);
        assert_ne!(a, b);

        let (c, _) = series_fingerprint("in_octets", &tags(&[("device", "r2")]));
        assert_ne!(a, c);

        let (d, _) = series_fingerprint("in_octets", &t);
        assert_eq!(a, d);
    }

    #[test]
    fn test_get_verifies_identity() {
        let mut cache: TtlCache<f64> = TtlCache::new(
            Duration::from_secs(300),
            Duration::from_secs(3600),
        );
        cache.insert(42, "in_octetsdevicer1".to_string(), 0, 1.0);

        assert!(cache.get(42, "in_octetsdevicer1").is_some());
        // Same fingerprint, different identity: treated as a miss.
        assert!(cache.get(42, "somethingelse").is_none());
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        // Zero period and retention make the second maybe_sweep evict
        // everything older than now.
        let mut cache: TtlCache<f64> = TtlCache::new(Duration::ZERO, Duration::ZERO);

        cache.maybe_sweep(); // starts the clock
        cache.insert(1, "old".to_string(), 0, 1.0);
        assert_eq!(cache.len(), 1);

        cache.maybe_sweep();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_keeps_fresh_entries() {
        let mut cache: TtlCache<f64> =
            TtlCache::new(Duration::ZERO, Duration::from_secs(3600));

        cache.maybe_sweep();
        let now = unix_nanos();
        cache.insert(1, "fresh".to_string(), now, 1.0);

        cache.maybe_sweep();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_no_sweep_before_period_elapses() {
        let mut cache: TtlCache<f64> =
            TtlCache::new(Duration::from_secs(3600), Duration::ZERO);

        cache.maybe_sweep();
        cache.insert(1, "old".to_string(), 0, 1.0);

        // Period has not elapsed, the stale entry survives.
        cache.maybe_sweep();
        assert_eq!(cache.len(), 1);
    }
}
