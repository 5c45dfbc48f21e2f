//! Threshold monitoring with synthetic alarm measurements.
//!
//! Each probe watches one field. The `current` probe compares the value
//! itself; the delta family compares the change since the cached sample
//! (absolute, percentage, or per-second rate). Alarms carry a single
//! `exception` field with the computed value that tripped the threshold.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{MonitoringConfig, ProbeConfig};
use crate::measure::Measurement;

use super::cache::TtlCache;
use super::Processor;

pub struct MonitoringProcessor {
    cfg: MonitoringConfig,
    probes: HashMap<String, ProbeConfig>,
    cache: TtlCache<HashMap<String, f64>>,
}

impl MonitoringProcessor {
    pub fn new(cfg: MonitoringConfig) -> Self {
        let probes = cfg
            .probes
            .iter()
            .map(|p| (p.field.clone(), p.clone()))
            .collect();
        let cache = TtlCache::new(cfg.period, cfg.retention);
        Self { cfg, probes, cache }
    }

    fn build_alarm(&self, source: &Measurement, probe: &ProbeConfig, computed: f64) -> Measurement {
        let mut alarm = Measurement::new(self.cfg.measurement.clone(), source.timestamp());
        alarm.add_tag(self.cfg.tag_name.clone(), probe.alarm_name.clone());
        alarm.add_field("exception", computed);

        if probe.copy_tag {
            if probe.tags.is_empty() {
                for (k, v) in source.tag_list() {
                    alarm.add_tag(k.clone(), v.clone());
                }
            } else {
                for key in &probe.tags {
                    if let Some(v) = source.get_tag(key) {
                        alarm.add_tag(key.clone(), v.to_string());
                    }
                }
            }
        }

        alarm
    }
}

fn operator_hit(operator: &str, computed: f64, threshold: f64) -> bool {
    match operator {
        "lt" => computed < threshold,
        "gt" => computed > threshold,
        "eq" => computed == threshold,
        _ => false,
    }
}

fn series_ident(m: &Measurement) -> String {
    let mut sorted: Vec<&(String, String)> = m.tag_list().iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut ident = String::from(m.name());
    for (k, v) in sorted {
        ident.push_str(k);
        ident.push_str(v);
    }
    ident
}

impl Processor for MonitoringProcessor {
    fn name(&self) -> &'static str {
        "monitoring"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        self.cache.maybe_sweep();

        let mut alarms = Vec::new();

        for m in &batch {
            // Configured fields with numeric values on this measurement.
            let observed: HashMap<String, f64> = m
                .field_list()
                .iter()
                .filter(|(k, _)| self.probes.contains_key(k))
                .filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f)))
                .collect();

            if observed.is_empty() {
                continue;
            }

            let id = m.hash_id();
            let ident = series_ident(m);
            let timestamp = m.timestamp();

            let prior = self
                .cache
                .get(id, &ident)
                .map(|e| (e.stamp, e.value.clone()));

            let mut wants_cache = false;

            for (field, value) in &observed {
                let probe = &self.probes[field];

                if *value < probe.min_value {
                    continue;
                }

                let computed = match probe.probe_type.as_str() {
                    "current" => Some(*value),
                    "delta" => prior
                        .as_ref()
                        .and_then(|(_, fields)| fields.get(field))
                        .map(|prev| value - prev),
                    "delta_percent" => prior
                        .as_ref()
                        .and_then(|(_, fields)| fields.get(field))
                        .map(|prev| ((value - prev) / prev) * 100.0),
                    "delta_rate" => prior.as_ref().and_then(|(stamp, fields)| {
                        let delta_t = (timestamp - stamp) as f64 / 1e9;
                        if delta_t <= 0.0 {
                            return None;
                        }
                        fields.get(field).map(|prev| (value - prev) / delta_t)
                    }),
                    _ => None,
                };

                if probe.probe_type != "current" {
                    wants_cache = true;
                }

                if let Some(computed) = computed {
                    if operator_hit(&probe.operator, computed, probe.threshold) {
                        debug!(
                            field = %field,
                            computed,
                            threshold = probe.threshold,
                            "threshold reached",
                        );
                        alarms.push(self.build_alarm(m, probe, computed));
                    }
                }
            }

            // Delta-family probes always track the current sample.
            if wants_cache {
                self.cache.insert(id, ident, timestamp, observed);
            }
        }

        batch.extend(alarms);
        batch
    }
}
