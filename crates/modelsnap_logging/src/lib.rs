//! Logging setup and home-directory layout for modelsnap.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "modelsnap=info,modelsnap_ingest=info";
const VERBOSE_LOG_FILTER: &str = "modelsnap=debug,modelsnap_ingest=debug";
/// Rolled copies kept next to the live log.
const LOG_HISTORY: usize = 4;
const LOG_SIZE_LIMIT: u64 = 10 * 1024 * 1024;

/// Environment variable overriding [`modelsnap_home`].
pub const HOME_ENV: &str = "MODELSNAP_HOME";

pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Raise the default filter to debug. `RUST_LOG` still wins when set.
    pub verbose: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let log_file = RotatingLog::open(&log_dir, config.app_name, LOG_HISTORY, LOG_SIZE_LIMIT)
        .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;

    let default_filter = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console_filter = file_filter.clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Get the modelsnap home directory: ~/.modelsnap
///
/// Falls back to `./.modelsnap` when no home directory can be determined.
pub fn modelsnap_home() -> PathBuf {
    if let Some(override_path) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".modelsnap")
}

/// Get the logs directory: ~/.modelsnap/logs
pub fn logs_dir() -> PathBuf {
    modelsnap_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-capped log file. The live file is `<stem>.log`; rolled copies are
/// `<stem>.log.1` (newest) up to `<stem>.log.<history>`.
struct RotatingLog {
    dir: PathBuf,
    stem: String,
    history: usize,
    limit: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingLog {
    fn open(dir: &Path, stem: &str, history: usize, limit: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let mut log = Self {
            dir: dir.to_path_buf(),
            stem: stem.replace(|c: char| !c.is_ascii_alphanumeric() && c != '-', "_"),
            history: history.max(1),
            limit,
            file: None,
            written: 0,
        };
        log.open_live()?;
        if log.written >= limit {
            log.roll()?;
        }
        Ok(log)
    }

    /// Generation 0 is the live file.
    fn path(&self, generation: usize) -> PathBuf {
        match generation {
            0 => self.dir.join(format!("{}.log", self.stem)),
            n => self.dir.join(format!("{}.log.{n}", self.stem)),
        }
    }

    fn open_live(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Shift every generation up by one; the last one is overwritten.
    fn roll(&mut self) -> io::Result<()> {
        drop(self.file.take());
        for generation in (0..self.history).rev() {
            match fs::rename(self.path(generation), self.path(generation + 1)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        self.open_live()
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "log file closed"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
