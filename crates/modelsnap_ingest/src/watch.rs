//! Watch loop: the pipeline driver.
//!
//! Candidates come from two sources:
//! - push: a `notify` watcher forwards create and rename-into events
//! - poll: a periodic full listing of the watch directory
//!
//! Notifications can be coalesced or dropped, and the watcher cannot be armed
//! before the directory exists, so the rescan is the exhaustive fallback.
//! Both sources end up in [`WatchLoop::ingest`], which claims the file through
//! the tracker, loads and places the model, marks it processed and spawns the
//! capture → archive → upload tail. The tail never blocks the loop.

use crate::config::Config;
use crate::delivery::{Batch, DeliveryQueue, DeliverySender, DeliveryStats, RetryPolicy};
use crate::error::WatchError;
use crate::model::{self, Model, ModelLoader, ObjLoader};
use crate::scan::{list_candidates, matches_extension};
use crate::snapshot::{self, SnapshotProducer, WireframeRenderer};
use crate::tracker::IngestionTracker;
use crate::upload::Uploader;
use chrono::Utc;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Not a matching file, already processed, in flight, or given up on.
    Skipped,
    /// Load failed; released for a later rescan.
    LoadFailed,
    /// Loaded but the processed rename failed; stays in flight for this run.
    RenameFailed,
    /// Marked processed and handed to the tail.
    Accepted { marked: PathBuf, batch: String },
}

/// Ingestion counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub load_failed: u64,
    pub rename_failed: u64,
    pub capture_failed: u64,
    pub rescans: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub ingest: IngestStats,
    pub delivery: DeliveryStats,
    /// Shutdown hit its timeout before all batches finished.
    pub timed_out: bool,
}

pub struct WatchLoop {
    config: Config,
    tracker: Arc<IngestionTracker>,
    loader: Arc<dyn ModelLoader>,
    producer: Arc<dyn SnapshotProducer>,
    deliveries: DeliveryQueue,
    delivery_tx: DeliverySender,
    tails: JoinSet<bool>,
    candidates_tx: mpsc::UnboundedSender<PathBuf>,
    candidates_rx: mpsc::UnboundedReceiver<PathBuf>,
    watcher: Option<RecommendedWatcher>,
    stats: IngestStats,
}

impl WatchLoop {
    /// Build a loop with explicit collaborators. Must be called inside a tokio
    /// runtime (the delivery worker starts immediately).
    pub fn new(
        config: Config,
        loader: Arc<dyn ModelLoader>,
        producer: Arc<dyn SnapshotProducer>,
        uploader: Uploader,
    ) -> Self {
        let tracker = Arc::new(IngestionTracker::new(
            config.marker.clone(),
            config.max_load_attempts,
        ));
        let deliveries = DeliveryQueue::start(
            uploader,
            RetryPolicy::from(config.upload.retry),
            config.cleanup_after_upload,
        );
        let delivery_tx = deliveries.sender();
        let (candidates_tx, candidates_rx) = mpsc::unbounded_channel();
        Self {
            config,
            tracker,
            loader,
            producer,
            deliveries,
            delivery_tx,
            tails: JoinSet::new(),
            candidates_tx,
            candidates_rx,
            watcher: None,
            stats: IngestStats::default(),
        }
    }

    /// OBJ loader, wireframe renderer and an uploader from `config.upload`.
    pub fn with_defaults(config: Config) -> Result<Self, WatchError> {
        let uploader = Uploader::from_config(&config.upload)?;
        let producer = WireframeRenderer::new(config.render.resolution);
        Ok(Self::new(
            config,
            Arc::new(ObjLoader),
            Arc::new(producer),
            uploader,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> Arc<IngestionTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Sender feeding the same channel as filesystem notifications.
    pub fn candidate_sender(&self) -> mpsc::UnboundedSender<PathBuf> {
        self.candidates_tx.clone()
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Run until `shutdown` resolves, then drain in-flight batches.
    pub async fn run<F>(mut self, shutdown: F) -> WatchSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            watch_dir = %self.config.watch_dir.display(),
            work_dir = %self.config.work_dir.display(),
            "Watching for .{} files",
            self.config.extension()
        );

        let mut ticker = tokio::time::interval(self.config.rescan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            self.reap_tails();

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting models");
                    break;
                }

                Some(path) = self.candidates_rx.recv() => {
                    self.ingest(&path);
                }

                // First tick fires immediately: that is the startup scan.
                _ = ticker.tick() => {
                    self.rescan();
                }
            }
        }

        self.shutdown().await
    }

    /// One sweep, process what it finds, drain, return. Notifications are
    /// never armed.
    pub async fn run_once(mut self) -> WatchSummary {
        self.sweep();
        self.shutdown().await
    }

    /// List the watch directory and ingest every eligible file, arming the
    /// notification source once the directory exists.
    ///
    /// Returns how many files were accepted.
    pub fn rescan(&mut self) -> usize {
        self.scan(true)
    }

    /// Like [`rescan`](Self::rescan) without touching the notification source.
    pub fn sweep(&mut self) -> usize {
        self.scan(false)
    }

    fn scan(&mut self, arm: bool) -> usize {
        self.stats.rescans += 1;
        let dir = self.config.watch_dir.clone();
        let listing = match list_candidates(&dir, self.config.extension()) {
            Ok(listing) => listing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(watch_dir = %dir.display(), "Watch directory does not exist yet");
                if self.watcher.take().is_some() {
                    warn!(watch_dir = %dir.display(), "Watch directory disappeared");
                }
                return 0;
            }
            Err(e) => {
                warn!(watch_dir = %dir.display(), error = %e, "Rescan failed");
                return 0;
            }
        };

        if arm {
            self.ensure_watcher();
        }

        let mut accepted = 0;
        for path in listing {
            if !self.tracker.is_eligible(&path) {
                continue;
            }
            if matches!(self.ingest(&path), IngestOutcome::Accepted { .. }) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Single entry point for both candidate sources.
    pub fn ingest(&mut self, path: &Path) -> IngestOutcome {
        if !matches_extension(path, self.config.extension()) {
            return IngestOutcome::Skipped;
        }
        if !self.tracker.try_claim(path) {
            return IngestOutcome::Skipped;
        }

        info!(path = %path.display(), "Loading model");
        let model = match self.loader.load(path) {
            Ok(model) => model,
            Err(e) => {
                self.stats.load_failed += 1;
                let failures = self.tracker.release(path);
                if self.tracker.is_quarantined(path) {
                    error!(
                        path = %path.display(),
                        failures,
                        error = %e,
                        "Model failed to load too many times, skipping until the file changes"
                    );
                } else {
                    warn!(
                        path = %path.display(),
                        failures,
                        error = %e,
                        "Model failed to load, will retry on next rescan"
                    );
                }
                return IngestOutcome::LoadFailed;
            }
        };

        let placed = model::place(&model, &self.config.placement);
        debug!(
            path = %path.display(),
            vertices = placed.vertices.len(),
            faces = placed.faces.len(),
            "Model placed"
        );

        let marked = match self.tracker.mark_processed(path) {
            Ok(marked) => marked,
            Err(e) => {
                self.stats.rename_failed += 1;
                error!(
                    path = %path.display(),
                    error = %e,
                    "Could not mark model as processed; it will not be retried until restart"
                );
                return IngestOutcome::RenameFailed;
            }
        };

        let batch = Batch::for_model(&self.config.work_dir, path, Utc::now());
        info!(
            model = %marked.display(),
            batch = %batch.id,
            "Model ingested, starting snapshots"
        );
        let id = batch.id.clone();
        self.spawn_tail(placed, batch);
        self.stats.accepted += 1;

        IngestOutcome::Accepted { marked, batch: id }
    }

    fn spawn_tail(&mut self, model: Model, batch: Batch) {
        let producer = Arc::clone(&self.producer);
        let deliveries = self.delivery_tx.clone();
        let count = self.config.batch_size;

        self.tails.spawn(async move {
            let snapshot_dir = batch.snapshot_dir.clone();
            let captured = tokio::task::spawn_blocking(move || {
                snapshot::capture(producer.as_ref(), &model, &snapshot_dir, count)
            })
            .await;

            let ok = match captured {
                Ok(Ok(paths)) => {
                    debug!(batch = %batch.id, snapshots = paths.len(), "Snapshots captured");
                    true
                }
                Ok(Err(e)) => {
                    warn!(
                        batch = %batch.id,
                        error = %e,
                        "Snapshot capture aborted, archiving what was written"
                    );
                    false
                }
                Err(e) => {
                    error!(batch = %batch.id, "Snapshot task panicked: {}", e);
                    false
                }
            };

            deliveries.submit(batch);
            ok
        });
    }

    fn reap_tails(&mut self) {
        while let Some(res) = self.tails.try_join_next() {
            self.record_tail(res);
        }
    }

    fn record_tail(&mut self, res: Result<bool, tokio::task::JoinError>) {
        match res {
            Ok(true) => {}
            Ok(false) => self.stats.capture_failed += 1,
            Err(e) => {
                self.stats.capture_failed += 1;
                error!("Batch task failed: {:?}", e);
            }
        }
    }

    /// Arm the notification source once the directory exists.
    fn ensure_watcher(&mut self) {
        if self.watcher.is_some() {
            return;
        }
        match spawn_watcher(
            &self.config.watch_dir,
            self.config.extension().to_string(),
            self.candidates_tx.clone(),
        ) {
            Ok(watcher) => {
                debug!(watch_dir = %self.config.watch_dir.display(), "Notifications armed");
                self.watcher = Some(watcher);
            }
            Err(e) => {
                warn!(
                    watch_dir = %self.config.watch_dir.display(),
                    error = %e,
                    "Could not arm notifications, relying on rescans"
                );
            }
        }
    }

    /// Stop notifications and wait for tails and deliveries, bounded by
    /// `shutdown_timeout`.
    pub async fn shutdown(mut self) -> WatchSummary {
        self.watcher = None;
        let timeout = self.config.shutdown_timeout();
        let deadline = Instant::now() + timeout;
        info!(
            pending = self.tails.len(),
            "Waiting up to {:?} for in-flight batches",
            timeout
        );

        let drain = async {
            while let Some(res) = self.tails.join_next().await {
                self.record_tail(res);
            }
        };
        let tails_done = tokio::time::timeout_at(deadline, drain).await.is_ok();

        let Self {
            stats,
            deliveries,
            delivery_tx,
            mut tails,
            ..
        } = self;
        drop(delivery_tx);

        let (delivery, timed_out) = if tails_done {
            let counters = deliveries.stats();
            match tokio::time::timeout_at(deadline, deliveries.shutdown()).await {
                Ok(stats) => (stats, false),
                Err(_) => {
                    warn!("Deliveries still running at shutdown timeout, abandoning them");
                    (counters, true)
                }
            }
        } else {
            warn!("Snapshot tasks still running at shutdown timeout, abandoning them");
            tails.abort_all();
            (deliveries.abort(), true)
        };

        WatchSummary {
            ingest: stats,
            delivery,
            timed_out,
        }
    }
}

fn spawn_watcher(
    dir: &Path,
    extension: String,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> notify::Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            for path in notification_candidates(&event) {
                if matches_extension(&path, &extension) {
                    // Receiver gone means the loop is shutting down.
                    let _ = tx.send(path);
                }
            }
        }
        Err(e) => warn!(error = %e, "Filesystem notification error"),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Paths worth a look from one notification: created files and rename targets.
pub fn notification_candidates(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        _ => Vec::new(),
    }
}
