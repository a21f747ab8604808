//! modelsnap ingest - model watching, snapshotting and delivery
//!
//! Watches a directory for new model files, processes each exactly once, and
//! ships a zip of rendered snapshots to a receiver over HTTPS.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ notify events│     │  Ingestion  │     │ load + place │     │ capture →    │
//! │ + rescans    │────▶│  Tracker    │────▶│ mark _READED │────▶│ archive →    │
//! │ (WatchLoop)  │     │ (claim)     │     │              │     │ upload (task)│
//! └──────────────┘     └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Processed marker**: `car.obj` becomes `car_READED.obj`; the filesystem is
//!   the ledger of what has been done
//! - **Claim**: eligibility check and in-flight insertion under one lock
//! - **Batch**: per-model directory with `photos/photo{1..N}.png` and `<stem>.zip`
//! - **Delivery queue**: archive rebuild + upload with bounded backoff, off the
//!   watch loop

pub mod archive;
pub mod config;
pub mod delivery;
pub mod error;
pub mod model;
pub mod scan;
pub mod snapshot;
pub mod tracker;
pub mod upload;
pub mod watch;

// Re-exports for convenience
pub use config::{Config, PlacementConfig, RenderConfig, RetryConfig, UploadConfig};
pub use delivery::{Batch, DeliveryOutcome, DeliveryQueue, DeliveryStats, RetryPolicy};
pub use error::{ArchiveError, CaptureError, ConfigError, LoadError, TrackerError, UploadError, WatchError};
pub use model::{Model, ModelLoader, ObjLoader};
pub use snapshot::{capture, SnapshotProducer, View, WireframeRenderer};
pub use tracker::IngestionTracker;
pub use upload::{Ack, Uploader};
pub use watch::{IngestOutcome, IngestStats, WatchLoop, WatchSummary};
