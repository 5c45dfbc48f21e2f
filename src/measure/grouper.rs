//! Series grouper: coalesces field updates that share a series and
//! timestamp into one measurement.
//!
//! One grouper lives per subscribe response or RPC reply, so ordering is
//! per-burst and the grouper never spans connections.

use std::collections::HashMap;

use xxhash_rust::xxh64::Xxh64;

use super::{Measurement, Value};

/// Merges `(name, tags, time)` buckets, preserving first-seen bucket order
/// and per-bucket field insertion order.
#[derive(Default)]
pub struct SeriesGrouper {
    order: Vec<Measurement>,
    index: HashMap<u64, usize>,
}

impl SeriesGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one field update into its bucket, creating the bucket on first
    /// sight. Tags are applied in the iteration order of `tags`.
    pub fn add(
        &mut self,
        name: &str,
        tags: &[(String, String)],
        timestamp: i64,
        field_key: impl Into<String>,
        field_value: impl Into<Value>,
    ) {
        let key = bucket_key(name, tags, timestamp);
        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                let mut m = Measurement::new(name, timestamp);
                for (k, v) in tags {
                    m.add_tag(k.clone(), v.clone());
                }
                self.order.push(m);
                let idx = self.order.len() - 1;
                self.index.insert(key, idx);
                idx
            }
        };
        self.order[idx].add_field(field_key, field_value);
    }

    /// Drain the grouper, returning merged measurements in bucket order.
    pub fn into_measurements(self) -> Vec<Measurement> {
        self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn bucket_key(name: &str, tags: &[(String, String)], timestamp: i64) -> u64 {
    let mut h = Xxh64::new(0);
    h.update(name.as_bytes());
    for (k, v) in tags {
        h.update(b"\x00");
        h.update(k.as_bytes());
        h.update(b"\x01");
        h.update(v.as_bytes());
    }
    h.update(&timestamp.to_le_bytes());
    h.digest()
}
