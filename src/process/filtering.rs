//! Regex filtering over tags and string fields.
//!
//! A drop rule removes measurements whose value matches; an accept rule
//! removes those whose value does not. Rules only apply when the key is
//! present, and only string-valued fields participate. Removal uses
//! swap-remove, so batch order is not preserved.

use std::collections::HashMap;

use regex::Regex;
use tracing::warn;

use crate::config::{FilterRule, FilteringConfig};
use crate::measure::{Measurement, Value};

use super::Processor;

pub struct FilteringProcessor {
    cfg: FilteringConfig,
    /// Write-once per pattern; a failed compile is remembered so the
    /// warning fires only on first use.
    regex_cache: HashMap<String, Option<Regex>>,
}

impl FilteringProcessor {
    pub fn new(cfg: FilteringConfig) -> Self {
        Self {
            cfg,
            regex_cache: HashMap::new(),
        }
    }

    /// Compile-on-first-use regex match. A compile failure logs once and
    /// makes the rule inert.
    fn matches(&mut self, pattern: &str, text: &str) -> Option<bool> {
        let compiled = self
            .regex_cache
            .entry(pattern.to_string())
            .or_insert_with(|| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "invalid filter pattern");
                    None
                }
            });

        compiled.as_ref().map(|regex| regex.is_match(text))
    }

    fn flagged_for_removal(&mut self, m: &Measurement) -> bool {
        let mut drop = false;

        let tag_rules = self.cfg.tags.clone();
        for rule in &tag_rules {
            if let Some(value) = m.get_tag(&rule.key) {
                let value = value.to_string();
                if rule_drops(self.matches(&rule.pattern, &value), rule) {
                    drop = true;
                }
            }
        }

        let field_rules = self.cfg.fields.clone();
        for rule in &field_rules {
            if let Some(Value::String(value)) = m.get_field(&rule.key) {
                let value = value.clone();
                if rule_drops(self.matches(&rule.pattern, &value), rule) {
                    drop = true;
                }
            }
        }

        drop
    }
}

fn rule_drops(matched: Option<bool>, rule: &FilterRule) -> bool {
    match matched {
        Some(true) => rule.action == "drop",
        Some(false) => rule.action == "accept",
        // Broken pattern: the rule is inert.
        None => false,
    }
}

impl Processor for FilteringProcessor {
    fn name(&self) -> &'static str {
        "filtering"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        let mut i = 0;
        while i < batch.len() {
            if self.flagged_for_removal(&batch[i]) {
                batch.swap_remove(i);
            } else {
                i += 1;
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(key: &str, pattern: &str, action: &str) -> FilterRule {
        FilterRule {
            key: key.to_string(),
            pattern: pattern.to_string(),
            action: action.to_string(),
        }
    }

    fn tagged(device: &str) -> Measurement {
        let mut m = Measurement::new("m", 0);
        m.add_tag("device", device);
        m.add_field("x", 1i64);
        m
    }

    #[test]
    fn test_drop_rule_removes_matching() {
        let mut p = FilteringProcessor::new(FilteringConfig {
            tags: vec![rule("device", "^r1$", "drop")],
            fields: vec![],
        });

        let out = p.apply(vec![tagged("r1"), tagged("r2"), tagged("r1")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_tag("device"), Some("r2"));
    }

    #[test]
    fn test_accept_rule_removes_non_matching() {
        let mut p = FilteringProcessor::new(FilteringConfig {
            tags: vec![rule("device", "^r[0-9]$", "accept")],
            fields: vec![],
        });

        let out = p.apply(vec![tagged("r1"), tagged("edge-1"), tagged("r2")]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_rule_ignores_measurements_without_key() {
        let mut p = FilteringProcessor::new(FilteringConfig {
            tags: vec![rule("device", "^r1$", "drop")],
            fields: vec![],
        });

        let mut untagged = Measurement::new("m", 0);
        untagged.add_field("x", 1i64);

        let out = p.apply(vec![untagged]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_field_rule_only_applies_to_strings() {
        let mut p = FilteringProcessor::new(FilteringConfig {
            tags: vec![],
            fields: vec![rule("status", "down", "drop")],
        });

        let mut down = Measurement::new("m", 0);
        down.add_field("status", "down");

        let mut numeric = Measurement::new("m", 0);
        numeric.add_field("status", 0i64);

        let out = p.apply(vec![down, numeric]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get_field("status"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_idempotent() {
        let mut p = FilteringProcessor::new(FilteringConfig {
            tags: vec![rule("device", "^r1$", "drop")],
            fields: vec![],
        });

        let batch = vec![tagged("r1"), tagged("r2"), tagged("r3")];
        let once = p.apply(batch);
        let mut names_once: Vec<String> = once
            .iter()
            .map(|m| m.get_tag("device").unwrap().to_string())
            .collect();

        let twice = p.apply(once.clone());
        let mut names_twice: Vec<String> = twice
            .iter()
            .map(|m| m.get_tag("device").unwrap().to_string())
            .collect();

        names_once.sort();
        names_twice.sort();
        assert_eq!(names_once, names_twice);
    }

    #[test]
    fn test_invalid_pattern_is_inert() {
        let mut p = FilteringProcessor::new(FilteringConfig {
            tags: vec![rule("device", "([unclosed", "drop")],
            fields: vec![],
        });

        let out = p.apply(vec![tagged("r1")]);
        assert_eq!(out.len(), 1);
    }
}
