//! Shortens xpath-style tag and field keys to their last path segment.
//! Values are untouched; the key "all" applies to every key.

use crate::config::{KeyMatch, XReducerConfig};
use crate::measure::Measurement;

use super::Processor;

pub struct XReducerProcessor {
    cfg: XReducerConfig,
}

impl XReducerProcessor {
    pub fn new(cfg: XReducerConfig) -> Self {
        Self { cfg }
    }
}

fn reduce_key(key: &mut String, rules: &[KeyMatch]) {
    let applies = rules
        .iter()
        .any(|rule| rule.key == "all" || rule.key == *key);
    if !applies || !key.contains('/') {
        return;
    }
    if let Some(last) = key.rsplit('/').next() {
        *key = last.to_string();
    }
}

impl Processor for XReducerProcessor {
    fn name(&self) -> &'static str {
        "xreducer"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        for m in batch.iter_mut() {
            for (key, _) in m.tag_list_mut().iter_mut() {
                reduce_key(key, &self.cfg.tags);
            }
            for (key, _) in m.field_list_mut().iter_mut() {
                reduce_key(key, &self.cfg.fields);
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::Value;

    fn all() -> Vec<KeyMatch> {
        vec![KeyMatch {
            key: "all".to_string(),
        }]
    }

    #[test]
    fn test_reduces_field_keys_to_last_segment() {
        let mut p = XReducerProcessor::new(XReducerConfig {
            tags: vec![],
            fields: all(),
        });

        let mut m = Measurement::new("m", 0);
        m.add_field("/a/b/c", 1i64);
        m.add_field("x", 2i64);

        let out = p.apply(vec![m]);
        assert_eq!(out[0].get_field("c"), Some(&Value::Int(1)));
        assert_eq!(out[0].get_field("x"), Some(&Value::Int(2)));
        assert_eq!(out[0].get_field("/a/b/c"), None);
    }

    #[test]
    fn test_reduces_only_named_tags() {
        let mut p = XReducerProcessor::new(XReducerConfig {
            tags: vec![KeyMatch {
                key: "/if/name".to_string(),
            }],
            fields: vec![],
        });

        let mut m = Measurement::new("m", 0);
        m.add_tag("/if/name", "ge-0");
        m.add_tag("/if/unit", "0");

        let out = p.apply(vec![m]);
        assert_eq!(out[0].get_tag("name"), Some("ge-0"));
        assert_eq!(out[0].get_tag("/if/unit"), Some("0"));
    }

    #[test]
    fn test_idempotent() {
        let mut p = XReducerProcessor::new(XReducerConfig {
            tags: all(),
            fields: all(),
        });

        let mut m = Measurement::new("m", 0);
        m.add_tag("/a/b", "v");
        m.add_field("/c/d", 1i64);

        let once = p.apply(vec![m]);
        let twice = p.apply(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_values_unchanged() {
        let mut p = XReducerProcessor::new(XReducerConfig {
            tags: all(),
            fields: vec![],
        });

        let mut m = Measurement::new("m", 0);
        m.add_tag("/if/name", "ge-0/0/0");

        let out = p.apply(vec![m]);
        // The value keeps its slashes; only the key is reduced.
        assert_eq!(out[0].get_tag("name"), Some("ge-0/0/0"));
    }
}
