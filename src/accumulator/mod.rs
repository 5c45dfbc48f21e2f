//! The push sink ingestion engines write into and the pipeline drains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::measure::Measurement;

/// Sink contract shared by both ingestion engines.
///
/// Implementations must be thread-safe; one accumulator instance is shared
/// by every device worker. `add_measurement` is non-blocking.
pub trait Accumulator: Send + Sync {
    fn add_measurement(&self, m: Measurement);

    /// Report a recoverable ingestion error (transport fault, undecodable
    /// update). The stream continues; the error is counted and logged.
    fn add_error(&self, err: anyhow::Error);
}

/// Channel-backed accumulator feeding the pipeline loop.
pub struct ChannelAccumulator {
    tx: mpsc::UnboundedSender<Measurement>,
    errors: AtomicU64,
}

impl ChannelAccumulator {
    /// Create the accumulator and the receiving half the pipeline drains.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Measurement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                errors: AtomicU64::new(0),
            }),
            rx,
        )
    }

    /// Total errors reported since start.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Accumulator for ChannelAccumulator {
    fn add_measurement(&self, m: Measurement) {
        // Send only fails when the pipeline is gone, i.e. during shutdown.
        let _ = self.tx.send(m);
    }

    fn add_error(&self, err: anyhow::Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "ingestion error");
    }
}

/// In-memory accumulator collecting everything it receives. Used by tests
/// and by the dry-run path when no pipeline is wired up.
#[derive(Default)]
pub struct CollectingAccumulator {
    measurements: parking_lot::Mutex<Vec<Measurement>>,
    errors: parking_lot::Mutex<Vec<String>>,
}

impl CollectingAccumulator {
    pub fn take_measurements(&self) -> Vec<Measurement> {
        std::mem::take(&mut self.measurements.lock())
    }

    pub fn take_errors(&self) -> Vec<String> {
        std::mem::take(&mut self.errors.lock())
    }
}

impl Accumulator for CollectingAccumulator {
    fn add_measurement(&self, m: Measurement) {
        self.measurements.lock().push(m);
    }

    fn add_error(&self, err: anyhow::Error) {
        self.errors.lock().push(format!("{err:#}"));
    }
}
