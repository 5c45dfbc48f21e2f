//! Agent orchestration: starts the health server, the ingestion engines
//! and the pipeline loop; stops everything in order on shutdown.
//!
//! Ingestion is fully concurrent (one worker per device per engine); the
//! accumulator funnels everything into a single pipeline task that owns
//! the processor chain, so chain state never needs locking.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::accumulator::{Accumulator, ChannelAccumulator};
use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::export::{Output, StdoutOutput};
use crate::gnmi::GnmiInput;
use crate::measure::Measurement;
use crate::netconf::NetconfInput;
use crate::process::Chain;

/// Agent wires all components together: inputs, accumulator, processor
/// chain, outputs and the health endpoint.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    gnmi: Vec<GnmiInput>,
    netconf: Vec<NetconfInput>,
    pipeline: Option<tokio::task::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            gnmi: Vec::new(),
            netconf: Vec::new(),
            pipeline: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components. This is the only hard-failure path: any
    /// configuration problem aborts here and nothing keeps running.
    pub async fn start(&mut self) -> Result<()> {
        self.cfg.validate()?;

        // 1. Health endpoint first so probes respond during startup.
        if self.cfg.health.enabled {
            self.health
                .start()
                .await
                .context("starting health metrics server")?;
        }

        // 2. Accumulator shared by every ingestion worker.
        let (acc, rx) = ChannelAccumulator::new();

        // 3. Build all inputs before starting any of them, so a bad
        // instance aborts start with nothing half-running.
        for gnmi_cfg in &self.cfg.inputs.gnmi {
            self.gnmi
                .push(GnmiInput::new(gnmi_cfg.clone()).context("building gnmi input")?);
        }
        for netconf_cfg in &self.cfg.inputs.netconf {
            self.netconf
                .push(NetconfInput::new(netconf_cfg.clone()).context("building netconf input")?);
        }

        let acc_dyn: Arc<dyn Accumulator> = acc.clone();
        for input in &mut self.gnmi {
            input.start(Arc::clone(&acc_dyn), self.cancel.child_token());
        }
        for input in &mut self.netconf {
            input.start(Arc::clone(&acc_dyn), self.cancel.child_token());
        }

        // 4. Pipeline loop: batches, processor chain, outputs.
        let chain = Chain::from_config(&self.cfg.processors);
        let mut outputs: Vec<Box<dyn Output>> = Vec::new();
        if self.cfg.outputs.stdout.enabled {
            outputs.push(Box::new(StdoutOutput::new()));
        }

        let pipeline = Pipeline {
            rx,
            chain,
            outputs,
            acc,
            health: Arc::clone(&self.health),
            flush_interval: self.cfg.pipeline.flush_interval,
            batch_size: self.cfg.pipeline.batch_size,
        };
        self.pipeline = Some(tokio::spawn(pipeline.run(self.cancel.child_token())));

        info!(
            gnmi = self.cfg.inputs.gnmi.len(),
            netconf = self.cfg.inputs.netconf.len(),
            processors = self.cfg.processors.len(),
            "agent fully started",
        );

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        // Join ingestion workers so nothing writes into a closing channel.
        for input in &mut self.gnmi {
            input.stop().await;
        }
        for input in &mut self.netconf {
            input.stop().await;
        }

        // Pipeline drains remaining measurements and flushes once more.
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.await;
        }

        self.health.stop().await;

        info!("agent stopped");
    }
}

struct Pipeline {
    rx: mpsc::UnboundedReceiver<Measurement>,
    chain: Chain,
    outputs: Vec<Box<dyn Output>>,
    acc: Arc<ChannelAccumulator>,
    health: Arc<HealthMetrics>,
    flush_interval: std::time::Duration,
    batch_size: usize,
}

impl Pipeline {
    async fn run(self, cancel: CancellationToken) {
        let Pipeline {
            mut rx,
            mut chain,
            mut outputs,
            acc,
            health,
            flush_interval,
            batch_size,
        } = self;

        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut batch: Vec<Measurement> = Vec::with_capacity(batch_size);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    flush(&mut batch, &mut chain, &mut outputs, &acc, &health);
                }
                received = rx.recv() => match received {
                    Some(m) => {
                        health.measurements_ingested.inc();
                        batch.push(m);
                        if batch.len() >= batch_size {
                            flush(&mut batch, &mut chain, &mut outputs, &acc, &health);
                        }
                    }
                    None => break,
                }
            }
        }

        // Drain whatever the workers pushed before they were joined.
        while let Ok(m) = rx.try_recv() {
            health.measurements_ingested.inc();
            batch.push(m);
        }
        flush(&mut batch, &mut chain, &mut outputs, &acc, &health);
    }
}

fn flush(
    batch: &mut Vec<Measurement>,
    chain: &mut Chain,
    outputs: &mut [Box<dyn Output>],
    acc: &ChannelAccumulator,
    health: &HealthMetrics,
) {
    if batch.is_empty() {
        return;
    }

    health.batch_size.observe(batch.len() as f64);
    health.ingest_errors.set(acc.error_count() as f64);

    let start = Instant::now();
    let processed = chain.apply(std::mem::take(batch));
    health.chain_duration.observe(start.elapsed().as_secs_f64());

    health.batches_processed.inc();
    health.measurements_emitted.inc_by(processed.len() as f64);

    for output in outputs.iter_mut() {
        if let Err(e) = output.write(&processed) {
            warn!(output = output.name(), error = %e, "output write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProcessorConfig, SumConfig, SumRule};
    use std::time::Duration;

    fn agent_config() -> Config {
        let mut cfg = Config::default();
        cfg.health.enabled = false;
        cfg.pipeline.flush_interval = Duration::from_millis(10);
        cfg.processors = vec![ProcessorConfig::Sum(SumConfig {
            fields: vec![SumRule {
                sources: vec!["a".to_string(), "b".to_string()],
                target: "total".to_string(),
            }],
        })];
        cfg
    }

    #[tokio::test]
    async fn test_agent_starts_and_stops_without_inputs() {
        let mut agent = Agent::new(agent_config()).unwrap();
        agent.start().await.unwrap();
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_pipeline_drains_on_stop() {
        let mut agent = Agent::new(agent_config()).unwrap();
        agent.start().await.unwrap();

        // No inputs configured; nothing to push, stop drains cleanly.
        tokio::time::sleep(Duration::from_millis(30)).await;
        agent.stop().await;

        assert_eq!(agent.health.measurements_ingested.get(), 0.0);
    }
}
