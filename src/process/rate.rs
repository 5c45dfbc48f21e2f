//! Rate derivation over counter fields.
//!
//! Keeps the previous sample per series and appends a `field + suffix`
//! rate field when enough time has elapsed. Negative rates mean the
//! counter reset: the rate is discarded but the cache still advances.

use std::collections::HashSet;

use tracing::debug;

use crate::config::RateConfig;
use crate::measure::Measurement;

use super::cache::{series_fingerprint, TtlCache};
use super::Processor;

pub struct RateProcessor {
    cfg: RateConfig,
    fields: HashSet<String>,
    cache: TtlCache<f64>,
}

impl RateProcessor {
    pub fn new(cfg: RateConfig) -> Self {
        let fields = cfg.fields.iter().cloned().collect();
        let cache = TtlCache::new(cfg.period, cfg.retention);
        Self { cfg, fields, cache }
    }
}

impl Processor for RateProcessor {
    fn name(&self) -> &'static str {
        "rate"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        self.cache.maybe_sweep();

        let delta_min = self.cfg.delta_min.as_secs_f64();

        for m in batch.iter_mut() {
            let timestamp = m.timestamp();
            let mut derived: Vec<(String, f64)> = Vec::new();

            for (key, value) in m.field_list() {
                if !self.fields.contains(key) {
                    continue;
                }
                let Some(value) = value.as_f64() else {
                    debug!(field = %key, "value is not numeric, skipping");
                    continue;
                };

                let (id, ident) = series_fingerprint(key, m.tag_list());

                match self.cache.get(id, &ident) {
                    Some(entry) => {
                        let delta = (timestamp - entry.stamp) as f64 / 1e9;
                        if delta >= delta_min && delta > 0.0 {
                            let rate = (value - entry.value) * self.cfg.factor / delta;
                            if rate >= 0.0 {
                                derived.push((format!("{key}{}", self.cfg.suffix), rate));
                            } else {
                                debug!(
                                    field = %key,
                                    "negative rate discarded, counter reset"
                                );
                            }
                            self.cache.insert(id, ident, timestamp, value);
                        } else {
                            debug!(field = %key, "delta_min constraint not met");
                        }
                    }
                    None => {
                        self.cache.insert(id, ident, timestamp, value);
                    }
                }
            }

            for (key, rate) in derived {
                m.add_field(key, rate);
            }
        }

        batch
    }
}
