//! Cross-measurement tag carrying.
//!
//! A rule tracks a key (field or tag) on measurements that also carry a
//! set of identifying tags. When the tracked value shows up it is cached
//! under the identity of those tags; measurements that later arrive with
//! the same identity but without the tracked key get the cached value
//! attached as a tag.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use crate::config::{XMetricRule, XMetricTagsConfig};
use crate::measure::Measurement;

use super::Processor;

struct CarriedTag {
    ident: String,
    value: String,
    /// Absolute expiry in Unix nanoseconds; sweeps drop entries past it.
    expires_at: i64,
}

pub struct XMetricTagsProcessor {
    cfg: XMetricTagsConfig,
    cache: HashMap<u64, CarriedTag>,
    last_cleared: Option<Instant>,
}

impl XMetricTagsProcessor {
    pub fn new(cfg: XMetricTagsConfig) -> Self {
        Self {
            cfg,
            cache: HashMap::new(),
            last_cleared: None,
        }
    }

    fn maybe_sweep(&mut self) {
        let now = Instant::now();
        match self.last_cleared {
            None => self.last_cleared = Some(now),
            Some(last) if now >= last + self.cfg.period => {
                let cutoff = unix_nanos();
                let before = self.cache.len();
                self.cache.retain(|_, entry| entry.expires_at >= cutoff);
                debug!(
                    removed = before - self.cache.len(),
                    remaining = self.cache.len(),
                    "carried-tag cache sweep",
                );
                self.last_cleared = Some(now);
            }
            Some(_) => {}
        }
    }

    fn apply_rule(&mut self, m: &mut Measurement, rule: &XMetricRule, track_is_field: bool) {
        // Every identifying tag must be present.
        let mut ident = rule.track_key.clone();
        for key in &rule.tag_keys {
            match m.get_tag(key) {
                Some(value) => ident.push_str(value),
                None => return,
            }
        }
        let id = xxh64(ident.as_bytes(), 0);

        let tracked: Option<String> = if track_is_field {
            m.get_field(&rule.track_key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        } else {
            m.get_tag(&rule.track_key).map(str::to_string)
        };

        match tracked {
            Some(value) if !value.is_empty() => {
                self.cache.insert(
                    id,
                    CarriedTag {
                        ident,
                        value: value.clone(),
                        expires_at: unix_nanos() + rule.retention.as_nanos() as i64,
                    },
                );
                m.add_tag(rule.tag_name.clone(), value);
            }
            Some(_) => {
                debug!(track_key = %rule.track_key, "empty tracked value");
            }
            None => {
                if let Some(entry) = self.cache.get(&id).filter(|e| e.ident == ident) {
                    m.add_tag(rule.tag_name.clone(), entry.value.clone());
                }
            }
        }
    }
}

impl Processor for XMetricTagsProcessor {
    fn name(&self) -> &'static str {
        "xmetrictags"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        self.maybe_sweep();

        let field_rules = self.cfg.fields.clone();
        let tag_rules = self.cfg.tags.clone();

        for m in batch.iter_mut() {
            for rule in &field_rules {
                self.apply_rule(m, rule, true);
            }
            for rule in &tag_rules {
                self.apply_rule(m, rule, false);
            }
        }

        batch
    }
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

    fn config() -> XMetricTagsConfig {
        XMetricTagsConfig {
            period: Duration::from_secs(300),
            fields: vec![XMetricRule {
                track_key: "parent_ae".to_string(),
                tag_keys: vec!["device".to_string(), "if_name".to_string()],
                tag_name: "lag_id".to_string(),
                retention: Duration::from_secs(3600),
            }],
            tags: vec![],
        }
    }

    fn member(with_field: bool) -> Measurement {
        let mut m = Measurement::new("ifcounters", 0);
        m.add_tag("device", "r1");
        m.add_tag("if_name", "ge-0/0/0");
        if with_field {
            m.add_field("parent_ae", "ae0");
        }
        m.add_field("in_octets", 100i64);
        m
    }

    #[test]
    fn test_tracked_field_caches_and_tags_source() {
        let mut p = XMetricTagsProcessor::new(config());

        let out = p.apply(vec![member(true)]);
        assert_eq!(out[0].get_tag("lag_id"), Some("ae0"));
        assert_eq!(p.cache.len(), 1);
    }

    #[test]
    fn test_later_measurement_gets_carried_tag() {
        let mut p = XMetricTagsProcessor::new(config());

        p.apply(vec![member(true)]);
        let out = p.apply(vec![member(false)]);
        assert_eq!(out[0].get_tag("lag_id"), Some("ae0"));
    }

    #[test]
    fn test_missing_identifying_tag_is_ignored() {
        let mut p = XMetricTagsProcessor::new(config());

        let mut m = Measurement::new("ifcounters", 0);
        m.add_tag("device", "r1"); // if_name missing
        m.add_field("parent_ae", "ae0");

        let out = p.apply(vec![m]);
        assert_eq!(out[0].get_tag("lag_id"), None);
        assert!(p.cache.is_empty());
    }

    #[test]
    fn test_empty_tracked_value_not_cached() {
        let mut p = XMetricTagsProcessor::new(config());

        let mut m = member(false);
        m.add_field("parent_ae", "");

        let out = p.apply(vec![m]);
        assert_eq!(out[0].get_tag("lag_id"), None);
        assert!(p.cache.is_empty());
    }

    #[test]
    fn test_unknown_identity_without_tracked_key_is_silent() {
        let mut p = XMetricTagsProcessor::new(config());

        let out = p.apply(vec![member(false)]);
        assert_eq!(out[0].get_tag("lag_id"), None);
    }

    #[test]
    fn test_tag_rule_tracks_tag_value() {
        let cfg = XMetricTagsConfig {
            period: Duration::from_secs(300),
            fields: vec![],
            tags: vec![XMetricRule {
                track_key: "slot".to_string(),
                tag_keys: vec!["device".to_string()],
                tag_name: "slot_copy".to_string(),
                retention: Duration::from_secs(3600),
            }],
        };
        let mut p = XMetricTagsProcessor::new(cfg);

        let mut source = Measurement::new("m", 0);
        source.add_tag("device", "r1");
        source.add_tag("slot", "fpc0");
        p.apply(vec![source]);

        let mut other = Measurement::new("m", 1);
        other.add_tag("device", "r1");
        let out = p.apply(vec![other]);
        assert_eq!(out[0].get_tag("slot_copy"), Some("fpc0"));
    }
}
