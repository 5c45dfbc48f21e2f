//! Processor framework: an ordered chain of `apply(batch) -> batch`
//! transforms over the measurement stream.
//!
//! A chain instance is driven by exactly one caller at a time; processors
//! own whatever cache state they keep and never block. Processors that
//! remove measurements use swap-remove, so batch order is not stable
//! across the chain.

pub mod cache;
pub mod enrichment;
pub mod filtering;
pub mod jitter;
pub mod monitoring;
pub mod rate;
pub mod sum;
pub mod xmetrictags;
pub mod xreducer;

use crate::config::ProcessorConfig;
use crate::measure::Measurement;

/// A stateful or stateless transform over measurement batches.
pub trait Processor: Send {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Transform one batch. May add, modify or remove measurements and may
    /// emit synthetic alarm measurements.
    fn apply(&mut self, batch: Vec<Measurement>) -> Vec<Measurement>;
}

/// The ordered processor chain.
#[derive(Default)]
pub struct Chain {
    processors: Vec<Box<dyn Processor>>,
}

impl Chain {
    /// Build the chain from configuration, in list order.
    pub fn from_config(configs: &[ProcessorConfig]) -> Self {
        let processors = configs
            .iter()
            .map(|cfg| -> Box<dyn Processor> {
                match cfg {
                    ProcessorConfig::Rate(c) => Box::new(rate::RateProcessor::new(c.clone())),
                    ProcessorConfig::Jitter(c) => {
                        Box::new(jitter::JitterProcessor::new(c.clone()))
                    }
                    ProcessorConfig::Monitoring(c) => {
                        Box::new(monitoring::MonitoringProcessor::new(c.clone()))
                    }
                    ProcessorConfig::Xmetrictags(c) => {
                        Box::new(xmetrictags::XMetricTagsProcessor::new(c.clone()))
                    }
                    ProcessorConfig::Filtering(c) => {
                        Box::new(filtering::FilteringProcessor::new(c.clone()))
                    }
                    ProcessorConfig::Xreducer(c) => {
                        Box::new(xreducer::XReducerProcessor::new(c.clone()))
                    }
                    ProcessorConfig::Sum(c) => Box::new(sum::SumProcessor::new(c.clone())),
                    ProcessorConfig::Enrichment(c) => {
                        Box::new(enrichment::EnrichmentProcessor::new(c.clone()))
                    }
                }
            })
            .collect();

        Self { processors }
    }

    /// Run the batch through every processor in order.
    pub fn apply(&mut self, batch: Vec<Measurement>) -> Vec<Measurement> {
        self.processors
            .iter_mut()
            .fold(batch, |batch, p| p.apply(batch))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
