//! Sums numeric source fields into a new target field.

use tracing::debug;

use crate::config::SumConfig;
use crate::measure::Measurement;

use super::Processor;

pub struct SumProcessor {
    cfg: SumConfig,
}

impl SumProcessor {
    pub fn new(cfg: SumConfig) -> Self {
        Self { cfg }
    }
}

impl Processor for SumProcessor {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        for m in batch.iter_mut() {
            for rule in &self.cfg.fields {
                let mut total = 0.0;
                let mut present = false;

                for source in &rule.sources {
                    if let Some(value) = m.get_field(source).and_then(|v| v.as_f64()) {
                        total += value;
                        present = true;
                    }
                }

                if present {
                    debug!(target = %rule.target, total, "adding sum field");
                    m.add_field(rule.target.clone(), total);
                }
            }
        }
        batch
    }
}
