//! Measurement model: a named, tagged, timestamped bag of typed fields.
//!
//! Tags and fields keep insertion order so downstream grouping and the
//! line-protocol writer are deterministic.

pub mod grouper;

pub use grouper::SeriesGrouper;

use std::fmt;

use xxhash_rust::xxh64::Xxh64;

/// Measurement name used for jitter exception metrics.
pub const JITTER_MEASUREMENT: &str = "JITTER_MEASUREMENT";

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Numeric view of the value, when it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Uint(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String view, for filter rules that only apply to string fields.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}i"),
            Value::Uint(v) => write!(f, "{v}u"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Bytes(b) => write!(f, "0x{}", hex(b)),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// A single telemetry measurement.
///
/// Construction happens in the ingestion engines; processors own the
/// measurements of the batch they are currently applying.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    name: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, Value)>,
    /// Unix timestamp in nanoseconds.
    timestamp: i64,
}

impl Measurement {
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Add or replace a tag, preserving the position of an existing key.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.tags.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.tags.push((key, value));
        }
    }

    /// Add or replace a field, preserving the position of an existing key.
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|(k, _)| k == key)
    }

    pub fn get_field(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Ordered view of the tags, insertion order.
    pub fn tag_list(&self) -> &[(String, String)] {
        &self.tags
    }

    /// Ordered view of the fields, insertion order.
    pub fn field_list(&self) -> &[(String, Value)] {
        &self.fields
    }

    /// Mutable access for processors that rewrite keys in place.
    pub fn tag_list_mut(&mut self) -> &mut Vec<(String, String)> {
        &mut self.tags
    }

    pub fn field_list_mut(&mut self) -> &mut Vec<(String, Value)> {
        &mut self.fields
    }

    /// Stable 64-bit series hash over name and sorted tags.
    ///
    /// Independent of the field set, so the same series hashes identically
    /// no matter which fields a particular update carried.
    pub fn hash_id(&self) -> u64 {
        let mut sorted: Vec<&(String, String)> = self.tags.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut h = Xxh64::new(0);
        h.update(self.name.as_bytes());
        for (k, v) in sorted {
            h.update(b"\x00");
            h.update(k.as_bytes());
            h.update(b"\x01");
            h.update(v.as_bytes());
        }
        h.digest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_order_is_insertion_order() {
        let mut m = Measurement::new("ifcounters", 0);
        m.add_tag("device", "r1");
        m.add_tag("if_name", "ge-0/0/0");
        m.add_tag("component", "fpc0");

        let keys: Vec<&str> = m.tag_list().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["device", "if_name", "component"]);
    }

    #[test]
    fn test_field_order_is_insertion_order() {
        let mut m = Measurement::new("ifcounters", 0);
        m.add_field("in_octets", 1000i64);
        m.add_field("out_octets", 2000i64);
        m.add_field("in_errors", 0i64);

        let keys: Vec<&str> = m.field_list().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["in_octets", "out_octets", "in_errors"]);
    }

    #[test]
    fn test_add_tag_replaces_in_place() {
        let mut m = Measurement::new("m", 0);
        m.add_tag("a", "1");
        m.add_tag("b", "2");
        m.add_tag("a", "3");

        assert_eq!(m.get_tag("a"), Some("3"));
        let keys: Vec<&str> = m.tag_list().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_hash_id_ignores_fields() {
        let mut a = Measurement::new("m", 0);
        a.add_tag("device", "r1");
        a.add_field("x", 1i64);

        let mut b = Measurement::new("m", 99);
        b.add_tag("device", "r1");
        b.add_field("y", 2.0);
        b.add_field("z", 3.0);

        assert_eq!(a.hash_id(), b.hash_id());
    }

    #[test]
    fn test_hash_id_independent_of_tag_order() {
        let mut a = Measurement::new("m", 0);
        a.add_tag("device", "r1");
        a.add_tag("if_name", "ge-0");

        let mut b = Measurement::new("m", 0);
        b.add_tag("if_name", "ge-0");
        b.add_tag("device", "r1");

        assert_eq!(a.hash_id(), b.hash_id());
    }

    #[test]
    fn test_hash_id_differs_across_series() {
        let mut a = Measurement::new("m", 0);
        a.add_tag("device", "r1");
        let mut b = Measurement::new("m", 0);
        b.add_tag("device", "r2");

        assert_ne!(a.hash_id(), b.hash_id());
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(Value::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(Value::Uint(7).as_f64(), Some(7.0));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Bool(true).as_f64(), None);
        assert_eq!(Value::String("x".into()).as_f64(), None);
    }
}
