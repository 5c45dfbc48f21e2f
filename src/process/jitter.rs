//! Sample-spacing jitter detection.
//!
//! Compares the spacing between consecutive samples of a series against
//! the expected interval and emits an exception measurement when the
//! deviation exceeds the configured maximum. The cache always advances.

use std::collections::HashSet;

use tracing::debug;

use crate::config::JitterConfig;
use crate::measure::{Measurement, JITTER_MEASUREMENT};

use super::cache::{series_fingerprint, TtlCache};
use super::Processor;

pub struct JitterProcessor {
    cfg: JitterConfig,
    fields: HashSet<String>,
    cache: TtlCache<f64>,
}

impl JitterProcessor {
    pub fn new(cfg: JitterConfig) -> Self {
        let fields = cfg.fields.iter().cloned().collect();
        let cache = TtlCache::new(cfg.period, cfg.retention);
        Self { cfg, fields, cache }
    }
}

impl Processor for JitterProcessor {
    fn name(&self) -> &'static str {
        "jitter"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        self.cache.maybe_sweep();

        let interval = self.cfg.interval.as_secs_f64();
        let jitter_max = self.cfg.jitter_max.as_secs_f64();
        let mut alarms = Vec::new();

        for m in &batch {
            let timestamp = m.timestamp();

            for (key, value) in m.field_list() {
                if !self.fields.contains(key) {
                    continue;
                }
                let Some(value) = value.as_f64() else {
                    debug!(field = %key, "value is not numeric, skipping");
                    continue;
                };

                let (id, ident) = series_fingerprint(key, m.tag_list());

                if let Some(entry) = self.cache.get(id, &ident) {
                    let delta = (timestamp - entry.stamp) as f64 / 1e9;
                    if (delta - interval).abs() > jitter_max {
                        let mut alarm = Measurement::new(JITTER_MEASUREMENT, timestamp);
                        alarm.add_field("exception", delta);
                        for (k, v) in m.tag_list() {
                            alarm.add_tag(k.clone(), v.clone());
                        }
                        alarms.push(alarm);
                        debug!(field = %key, delta, "sample spacing exceeded max jitter");
                    }
                }

                self.cache.insert(id, ident, timestamp, value);
            }
        }

        batch.extend(alarms);
        batch
    }
}
