//! Delivery queue: archive + upload with bounded retries.
//!
//! Batches are handed to a background task over an unbounded channel, so the
//! watch loop never waits on the network. Each batch is delivered in its own
//! task; every attempt rebuilds the archive from the batch's snapshot
//! directory and then posts it. Transient upload failures back off
//! exponentially up to `max_attempts`.

use crate::archive;
use crate::config::RetryConfig;
use crate::error::ArchiveError;
use crate::upload::Uploader;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Directory holding a batch's snapshots, relative to the batch directory.
pub const SNAPSHOT_DIR_NAME: &str = "photos";

/// Everything produced for one processed model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// `<stem>-<utc timestamp>`
    pub id: String,
    pub dir: PathBuf,
    pub snapshot_dir: PathBuf,
    pub archive_path: PathBuf,
}

impl Batch {
    /// Batch paths for a model file, unique per model and time.
    pub fn for_model(work_dir: &Path, model_path: &Path, now: DateTime<Utc>) -> Self {
        let stem = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "model".to_string());
        let id = format!("{}-{}", stem, now.format("%Y%m%dT%H%M%S%3f"));
        let dir = work_dir.join(&id);
        Self {
            snapshot_dir: dir.join(SNAPSHOT_DIR_NAME),
            archive_path: dir.join(format!("{stem}.zip")),
            id,
            dir,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`; `attempt` is 1-based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Final result of one batch.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32, status: u16 },
    UploadFailed { attempts: u32, error: String },
    /// `attempts` counts uploads made before the archive step failed.
    ArchiveFailed { attempts: u32, error: ArchiveError },
}

/// Counters across all batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub upload_failed: u64,
    pub archive_failed: u64,
    pub attempts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    upload_failed: AtomicU64,
    archive_failed: AtomicU64,
    attempts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.delivered.load(Ordering::SeqCst),
            upload_failed: self.upload_failed.load(Ordering::SeqCst),
            archive_failed: self.archive_failed.load(Ordering::SeqCst),
            attempts: self.attempts.load(Ordering::SeqCst),
        }
    }
}

/// Cloneable handle for submitting batches.
#[derive(Debug, Clone)]
pub struct DeliverySender {
    tx: mpsc::UnboundedSender<Batch>,
}

impl DeliverySender {
    pub fn submit(&self, batch: Batch) {
        let id = batch.id.clone();
        if self.tx.send(batch).is_err() {
            warn!(batch = %id, "Delivery queue closed, dropping batch");
        }
    }
}

/// Background delivery worker.
pub struct DeliveryQueue {
    sender: DeliverySender,
    worker: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl DeliveryQueue {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn start(uploader: Uploader, policy: RetryPolicy, cleanup_after_upload: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(
            rx,
            Arc::new(uploader),
            policy,
            cleanup_after_upload,
            Arc::clone(&counters),
        ));
        Self {
            sender: DeliverySender { tx },
            worker,
            counters,
        }
    }

    pub fn sender(&self) -> DeliverySender {
        self.sender.clone()
    }

    pub fn submit(&self, batch: Batch) {
        self.sender.submit(batch);
    }

    pub fn stats(&self) -> DeliveryStats {
        self.counters.snapshot()
    }

    /// Stop accepting batches and wait for queued ones to finish.
    ///
    /// Clones handed out by [`sender`](Self::sender) keep the queue open until
    /// they are dropped.
    pub async fn shutdown(self) -> DeliveryStats {
        let Self {
            sender,
            worker,
            counters,
        } = self;
        drop(sender);
        if let Err(e) = worker.await {
            error!("Delivery worker panicked: {:?}", e);
        }
        counters.snapshot()
    }

    /// Stop immediately, abandoning in-progress deliveries.
    pub fn abort(self) -> DeliveryStats {
        self.worker.abort();
        self.counters.snapshot()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Batch>,
    uploader: Arc<Uploader>,
    policy: RetryPolicy,
    cleanup: bool,
    counters: Arc<Counters>,
) {
    let mut active: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(batch) => {
                    let uploader = Arc::clone(&uploader);
                    let counters = Arc::clone(&counters);
                    active.spawn(async move {
                        let outcome = deliver(&uploader, &policy, &batch).await;
                        record(&counters, &batch, outcome, cleanup).await;
                    });
                }
                None => break,
            },
            Some(res) = active.join_next(), if !active.is_empty() => {
                if let Err(e) = res {
                    error!("Delivery task panicked: {:?}", e);
                }
            }
        }
    }

    debug!("Delivery queue closed, draining {} active deliveries", active.len());
    while let Some(res) = active.join_next().await {
        if let Err(e) = res {
            error!("Delivery task panicked: {:?}", e);
        }
    }
}

/// Archive and upload one batch, retrying transient upload failures.
pub async fn deliver(uploader: &Uploader, policy: &RetryPolicy, batch: &Batch) -> DeliveryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;

        let source = batch.snapshot_dir.clone();
        let target = batch.archive_path.clone();
        let built = tokio::task::spawn_blocking(move || archive::build(&source, &target))
            .await
            .unwrap_or_else(|e| Err(ArchiveError::Join(e.to_string())));
        match built {
            Ok(entries) => debug!(batch = %batch.id, entries, "Archive ready"),
            Err(error) => {
                return DeliveryOutcome::ArchiveFailed {
                    attempts: attempt - 1,
                    error,
                }
            }
        }

        match uploader.send(&batch.archive_path).await {
            Ok(ack) => {
                return DeliveryOutcome::Delivered {
                    attempts: attempt,
                    status: ack.status,
                }
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    batch = %batch.id,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Upload failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return DeliveryOutcome::UploadFailed {
                    attempts: attempt,
                    error: e.to_string(),
                }
            }
        }
    }
}

async fn record(counters: &Counters, batch: &Batch, outcome: DeliveryOutcome, cleanup: bool) {
    match outcome {
        DeliveryOutcome::Delivered { attempts, status } => {
            counters.attempts.fetch_add(attempts as u64, Ordering::SeqCst);
            counters.delivered.fetch_add(1, Ordering::SeqCst);
            info!(
                batch = %batch.id,
                archive = %batch.archive_path.display(),
                attempts,
                status,
                "Archive delivered"
            );
            if cleanup {
                if let Err(e) = tokio::fs::remove_dir_all(&batch.dir).await {
                    warn!(batch = %batch.id, error = %e, "Failed to remove batch directory");
                }
            }
        }
        DeliveryOutcome::UploadFailed { attempts, error } => {
            counters.attempts.fetch_add(attempts as u64, Ordering::SeqCst);
            counters.upload_failed.fetch_add(1, Ordering::SeqCst);
            error!(batch = %batch.id, attempts, error = %error, "Upload gave up");
        }
        DeliveryOutcome::ArchiveFailed { attempts, error } => {
            counters.attempts.fetch_add(attempts as u64, Ordering::SeqCst);
            counters.archive_failed.fetch_add(1, Ordering::SeqCst);
            error!(batch = %batch.id, error = %error, "Archive failed, upload skipped");
        }
    }
}
