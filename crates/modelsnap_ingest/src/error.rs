//! Error types for the ingestion pipeline
//!
//! Every stage has its own error so a failure can be reported against the
//! candidate or batch it belongs to. None of them ever stops the watch loop.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Model file could not be turned into geometry.
///
/// The candidate is released and retried on a later rescan.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed model {path} at line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Model {0} contains no geometry")]
    Empty(PathBuf),
}

/// Tracker failures. The only fallible transition is the processed rename.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Refusing to overwrite existing processed file {0}")]
    TargetExists(PathBuf),

    #[error("Path has no file name: {0}")]
    NoFileName(PathBuf),
}

/// A snapshot could not be rendered or written.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to prepare snapshot directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to render snapshot {index}: {message}")]
    Render { index: usize, message: String },

    #[error("Failed to encode snapshot {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Packaging failed; the upload for this attempt is skipped.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Cannot remove stale archive {path}: {source}")]
    Stale {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot read source directory {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to write archive {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Archive task panicked: {0}")]
    Join(String),
}

/// Upload failures, split by where they happened.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Connection refused, timeout, TLS handshake and the like.
    #[error("Transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The receiver answered with a non-2xx status.
    #[error("Receiver returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to read archive {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl UploadError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            UploadError::Transport(_) => true,
            UploadError::Status { status, .. } => *status >= 500 || *status == 429,
            UploadError::Io { .. } | UploadError::InvalidEndpoint(_) => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, UploadError::Transport(_))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Setup failures of the watch loop itself.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Upload client error: {0}")]
    Upload(#[from] UploadError),
}
