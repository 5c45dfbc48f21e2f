//! Ingestion engine B: periodic RPCs over NETCONF sessions.
//!
//! One blocking worker per device opens a session, then schedules the
//! configured RPCs on a jittered ~1s tick. Per-subscription counters start
//! staggered across the smallest interval so RPCs spread out instead of
//! bursting together. Reply parsing streams straight into the grouper.

pub mod session;
pub mod tree;
pub mod xml;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::accumulator::Accumulator;
use crate::config::NetconfConfig;
use crate::measure::SeriesGrouper;

use session::{NetconfSession, RpcError};
use tree::PathTree;

/// One subscription with its compiled path tree.
#[derive(Debug)]
pub struct CompiledSubscription {
    pub name: String,
    pub rpc: String,
    pub interval: Duration,
    pub tree: PathTree,
}

/// A running NETCONF plugin instance.
#[derive(Debug)]
pub struct NetconfInput {
    cfg: Arc<NetconfConfig>,
    subscriptions: Arc<Vec<CompiledSubscription>>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl NetconfInput {
    /// Compile every field spec. Configuration errors surface here.
    pub fn new(cfg: NetconfConfig) -> Result<Self> {
        if cfg.redial.is_zero() {
            bail!("redial duration must be positive");
        }

        let mut subscriptions = Vec::with_capacity(cfg.subscriptions.len());
        for sub in &cfg.subscriptions {
            let tree = PathTree::compile(&sub.fields)
                .with_context(|| format!("subscription {:?}", sub.name))?;
            subscriptions.push(CompiledSubscription {
                name: sub.name.clone(),
                rpc: sub.rpc.clone(),
                interval: sub.sample_interval,
                tree,
            });
        }

        Ok(Self {
            cfg: Arc::new(cfg),
            subscriptions: Arc::new(subscriptions),
            workers: Vec::new(),
        })
    }

    /// Spawn one blocking worker per device address.
    pub fn start(&mut self, acc: Arc<dyn Accumulator>, cancel: CancellationToken) {
        for address in self.cfg.addresses.clone() {
            let cfg = Arc::clone(&self.cfg);
            let subs = Arc::clone(&self.subscriptions);
            let acc = Arc::clone(&acc);
            let cancel = cancel.clone();

            self.workers.push(tokio::task::spawn_blocking(move || {
                run_worker(&cfg, &subs, &address, acc.as_ref(), &cancel);
            }));
        }

        info!(workers = self.cfg.addresses.len(), "netconf input started");
    }

    /// Join all workers. The caller cancels the token first.
    pub async fn stop(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
    }
}

fn run_worker(
    cfg: &NetconfConfig,
    subscriptions: &[CompiledSubscription],
    address: &str,
    acc: &dyn Accumulator,
    cancel: &CancellationToken,
) {
    debug!(device = %address, "netconf worker started");

    while !cancel.is_cancelled() {
        if let Err(e) = run_session(cfg, subscriptions, address, acc, cancel) {
            if !cancel.is_cancelled() {
                acc.add_error(e);
            }
        }

        if wait_or_cancel(cancel, cfg.redial) {
            break;
        }
    }

    debug!(device = %address, "netconf worker stopped");
}

/// One session lifetime: connect, hello, schedule RPCs until the session
/// or the collector dies. Session-level errors bubble to the redial loop.
fn run_session(
    cfg: &NetconfConfig,
    subscriptions: &[CompiledSubscription],
    address: &str,
    acc: &dyn Accumulator,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut session = NetconfSession::connect(address, &cfg.username, &cfg.password)
        .with_context(|| format!("unable to open netconf session for {address}"))?;

    debug!(device = %address, "netconf session established");

    // Jitter the tick so workers for concurrent devices do not synchronize.
    let tick = Duration::from_millis(1000 + rand::thread_rng().gen_range(0..10));

    // Stagger the initial counters across the smallest interval so the
    // RPCs distribute inside that window instead of firing back to back.
    let count = subscriptions.len().max(1) as u32;
    let min_interval = subscriptions
        .iter()
        .map(|s| s.interval)
        .min()
        .unwrap_or(tick);
    let stagger = min_interval / count;

    let mut counters: Vec<Duration> = (0..subscriptions.len())
        .map(|i| stagger * i as u32)
        .collect();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let loop_start = Instant::now();

        for (i, sub) in subscriptions.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if counters[i] < sub.interval {
                continue;
            }
            counters[i] = Duration::ZERO;

            debug!(device = %address, rpc = %sub.name, "issuing rpc");
            let rpc_start = Instant::now();
            let timestamp = unix_nanos();

            let reply = match session.rpc(&sub.rpc) {
                Ok(reply) => reply,
                Err(RpcError::Timeout) => {
                    debug!(device = %address, rpc = %sub.name, "rpc timed out");
                    continue;
                }
                Err(RpcError::Session(e)) => {
                    return Err(e.context(format!("rpc {:?} on {address}", sub.name)));
                }
            };

            if reply.is_empty() || reply.contains("<rpc-error>") {
                debug!(device = %address, rpc = %sub.name, "rpc error reply");
                continue;
            }

            let mut grouper = SeriesGrouper::new();
            xml::parse_reply(&sub.tree, &sub.name, address, timestamp, &reply, &mut grouper);
            for m in grouper.into_measurements() {
                acc.add_measurement(m);
            }

            debug!(
                device = %address,
                rpc = %sub.name,
                elapsed_ms = rpc_start.elapsed().as_millis() as u64,
                "rpc handled",
            );
        }

        // Fill the remainder of the tick, then credit the full loop time
        // to every counter.
        let elapsed = loop_start.elapsed();
        if elapsed < tick && wait_or_cancel(cancel, tick - elapsed) {
            return Ok(());
        }

        let total = loop_start.elapsed();
        for counter in counters.iter_mut() {
            *counter += total;
        }
    }
}

/// Sleep on a blocking thread in short slices so cancellation stays
/// prompt. Returns true when cancelled.
fn wait_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let slice = deadline
            .saturating_duration_since(now)
            .min(Duration::from_millis(100));
        std::thread::sleep(slice);
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
    use crate::config::NetconfSubscription;

    fn test_config() -> NetconfConfig {
        NetconfConfig {
            addresses: vec!["10.0.0.1".to_string()],
            username: "lab".to_string(),
            password: "lab123".to_string(),
            redial: Duration::from_secs(10),
            subscriptions: vec![NetconfSubscription {
                name: "ifcounters".to_string(),
                rpc: "<get-interface-information><statistics/></get-interface-information>"
                    .to_string(),
                fields: vec![
                    "/interface-information/physical-interface[ifname]/speed:string".to_string(),
                ],
                sample_interval: Duration::from_secs(10),
            }],
        }
    }

    #[test]
    fn test_new_compiles_field_specs() {
        let input = NetconfInput::new(test_config()).unwrap();
        assert_eq!(input.subscriptions.len(), 1);
        assert_eq!(input.subscriptions[0].name, "ifcounters");
        assert!(input.subscriptions[0]
            .tree
            .fields
            .contains_key("/interface-information/physical-interface/speed"));
    }

    #[test]
    fn test_new_rejects_zero_redial() {
        let mut cfg = test_config();
        cfg.redial = Duration::ZERO;
        assert!(NetconfInput::new(cfg).is_err());
    }

    #[test]
    fn test_new_rejects_malformed_spec() {
        let mut cfg = test_config();
        cfg.subscriptions[0]
            .fields
            .push("/no-type-here".to_string());
        let err = NetconfInput::new(cfg).unwrap_err();
        assert!(format!("{err:#}").contains("ifcounters"));
    }

    #[test]
    fn test_wait_or_cancel_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = Instant::now();
        assert!(wait_or_cancel(&cancel, Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_or_cancel_sleeps_full_duration() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        assert!(!wait_or_cancel(&cancel, Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
