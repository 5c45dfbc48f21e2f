//! File-backed tag enrichment.
//!
//! A two-level JSON mapping (`level1 -> level2 -> tags`) is loaded from
//! disk and refreshed on a minute-granularity schedule. The reload is
//! content-hash gated: unchanged bytes only bump the refresh clock, so the
//! in-memory map's identity is preserved across idle refreshes. File or
//! parse errors put the processor in an errored state that passes
//! measurements through untouched until a later refresh succeeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use md5::{Digest, Md5};
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::measure::Measurement;

use super::Processor;

/// Inner key holding unconditional additions for a level-1 match.
pub const LEVEL1_TAGS_KEY: &str = "LEVEL1TAGS";

type EnrichDb = HashMap<String, HashMap<String, HashMap<String, String>>>;

pub struct EnrichmentProcessor {
    cfg: EnrichmentConfig,
    /// Swapped atomically on reload; apply only ever sees a complete map.
    db: Option<Arc<EnrichDb>>,
    current_hash: String,
    last_update: Option<Instant>,
    file_error: bool,
}

impl EnrichmentProcessor {
    pub fn new(cfg: EnrichmentConfig) -> Self {
        Self {
            cfg,
            db: None,
            current_hash: String::new(),
            last_update: None,
            file_error: false,
        }
    }

    fn refresh_due(&self) -> bool {
        match self.last_update {
            None => true,
            Some(at) => {
                let period = Duration::from_secs(self.cfg.refresh_period.max(1) * 60);
                at.elapsed() >= period
            }
        }
    }

    /// Read, hash and (when changed) reparse the enrichment file. The
    /// file is read into memory once so hashing and parsing cannot
    /// diverge on a file that changes mid-refresh.
    fn refresh(&mut self) {
        let bytes = match std::fs::read(&self.cfg.file_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    file = %self.cfg.file_path,
                    error = %e,
                    "error opening enrichment file",
                );
                self.file_error = true;
                return;
            }
        };

        let hash = md5_hex(&bytes);

        if hash == self.current_hash && self.db.is_some() {
            self.file_error = false;
            self.last_update = Some(Instant::now());
            return;
        }

        match serde_json::from_slice::<EnrichDb>(&bytes) {
            Ok(db) => {
                debug!(entries = db.len(), "enrichment database updated");
                self.db = Some(Arc::new(db));
                self.current_hash = hash;
                self.file_error = false;
                self.last_update = Some(Instant::now());
            }
            Err(e) => {
                warn!(
                    file = %self.cfg.file_path,
                    error = %e,
                    "error parsing enrichment file",
                );
                self.file_error = true;
            }
        }
    }
}

impl Processor for EnrichmentProcessor {
    fn name(&self) -> &'static str {
        "enrichment"
    }

    fn apply(&mut self, mut batch: Vec<Measurement>) -> Vec<Measurement> {
        if self.db.is_none() || self.file_error || self.refresh_due() {
            self.refresh();
        }

        if self.file_error {
            return batch;
        }
        let Some(db) = self.db.clone() else {
            return batch;
        };

        for m in batch.iter_mut() {
            // Snapshot the source tags: lookups use what the ingester set,
            // not what this pass adds.
            let source_tags: Vec<(String, String)> = m.tag_list().to_vec();

            let Some(level1) = lookup(&source_tags, &self.cfg.level1_tag_key) else {
                continue;
            };
            let Some(inner) = db.get(level1) else {
                continue;
            };

            if let Some(tags) = inner.get(LEVEL1_TAGS_KEY) {
                for (key, value) in tags {
                    m.add_tag(key.clone(), value.clone());
                }
            }

            if self.cfg.two_levels {
                for level2_key in &self.cfg.level2_tag_keys {
                    let Some(level2) = lookup(&source_tags, level2_key) else {
                        continue;
                    };
                    if let Some(tags) = inner.get(level2) {
                        for (key, value) in tags {
                            m.add_tag(key.clone(), value.clone());
                        }
                    }
                }
            }
        }

        batch
    }
}

fn lookup<'a>(tags: &'a [(String, String)], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    let digest = hasher.finalize();

    let mut out = String::with_capacity(32);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
