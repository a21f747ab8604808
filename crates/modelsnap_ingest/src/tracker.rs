//! Ingestion tracker: decides which candidates get processed.
//!
//! The filesystem is the durable ledger. A processed file is renamed so its
//! name carries the marker token (`car.obj` → `car_READED.obj`), and any file
//! whose name contains the token is never eligible again. Within one run an
//! in-memory in-flight set keeps a file from being claimed twice while it is
//! being loaded.
//!
//! Entries are keyed by file name: the watch loop only looks at a single
//! directory, and notification paths and listing paths do not always agree on
//! the directory prefix.

use crate::error::TrackerError;
use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::debug;

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: HashSet<OsString>,
    load_failures: HashMap<OsString, LoadFailures>,
}

/// Size and mtime of a candidate when its load last failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct LoadFailures {
    count: u32,
    seen: Option<Fingerprint>,
}

/// Dedup and state core of the pipeline.
#[derive(Debug)]
pub struct IngestionTracker {
    marker: String,
    max_load_attempts: u32,
    state: Mutex<TrackerState>,
}

impl IngestionTracker {
    /// `max_load_attempts == 0` retries failed loads forever.
    pub fn new(marker: impl Into<String>, max_load_attempts: u32) -> Self {
        Self {
            marker: marker.into(),
            max_load_attempts,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// True when the file name carries the processed marker.
    pub fn is_marked(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().contains(self.marker.as_str()))
            .unwrap_or(false)
    }

    fn eligible_locked(&self, state: &TrackerState, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        if name.to_string_lossy().contains(self.marker.as_str()) {
            return false;
        }
        if state.in_flight.contains(name) {
            return false;
        }
        !self.quarantined_locked(state, path, name)
    }

    /// Out of attempts and untouched since the last failed load. A file that
    /// is still being written keeps changing, so it never ends up here.
    fn quarantined_locked(&self, state: &TrackerState, path: &Path, name: &OsStr) -> bool {
        if self.max_load_attempts == 0 {
            return false;
        }
        match state.load_failures.get(name) {
            Some(failures) if failures.count >= self.max_load_attempts => {
                failures.seen == Fingerprint::of(path)
            }
            _ => false,
        }
    }

    /// Not marked, not in flight, not given up on.
    pub fn is_eligible(&self, path: &Path) -> bool {
        let state = self.lock();
        self.eligible_locked(&state, path)
    }

    /// Add to the in-flight set. Idempotent.
    pub fn mark_in_flight(&self, path: &Path) {
        if let Some(name) = path.file_name() {
            self.lock().in_flight.insert(name.to_os_string());
        }
    }

    /// Eligibility check and in-flight insertion under one lock.
    ///
    /// Returns true only for the caller that won the claim.
    pub fn try_claim(&self, path: &Path) -> bool {
        let mut state = self.lock();
        if !self.eligible_locked(&state, path) {
            return false;
        }
        match path.file_name() {
            Some(name) => state.in_flight.insert(name.to_os_string()),
            None => false,
        }
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.lock().in_flight.contains(name))
            .unwrap_or(false)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Drop a claim after a failed load so a later rescan retries the file.
    ///
    /// Returns the number of consecutive failed loads of the file's current
    /// contents. The count starts over when size or mtime changed since the
    /// previous failure.
    pub fn release(&self, path: &Path) -> u32 {
        let Some(name) = path.file_name() else {
            return 0;
        };
        let seen = Fingerprint::of(path);
        let mut state = self.lock();
        state.in_flight.remove(name);
        let failures = state
            .load_failures
            .entry(name.to_os_string())
            .or_insert(LoadFailures { count: 0, seen });
        if failures.seen != seen {
            failures.count = 0;
            failures.seen = seen;
        }
        failures.count += 1;
        failures.count
    }

    /// True once an unchanged file has used up its load attempts.
    pub fn is_quarantined(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let state = self.lock();
        self.quarantined_locked(&state, path, name)
    }

    /// Name a processed file gets: marker inserted before the extension.
    pub fn marked_path(&self, path: &Path) -> Option<PathBuf> {
        marked_path(path, &self.marker)
    }

    /// Rename the file to its marked name and return the new path.
    ///
    /// On success the file leaves the in-flight set. On failure it stays in
    /// flight, so it is not retried until the process restarts.
    pub fn mark_processed(&self, path: &Path) -> Result<PathBuf, TrackerError> {
        let target = self
            .marked_path(path)
            .ok_or_else(|| TrackerError::NoFileName(path.to_path_buf()))?;

        let mut state = self.lock();
        if target.exists() {
            return Err(TrackerError::TargetExists(target));
        }
        std::fs::rename(path, &target).map_err(|source| TrackerError::Rename {
            from: path.to_path_buf(),
            to: target.clone(),
            source,
        })?;

        if let Some(name) = path.file_name() {
            state.in_flight.remove(name);
            state.load_failures.remove(name);
        }
        debug!(from = %path.display(), to = %target.display(), "Marked as processed");
        Ok(target)
    }
}

/// `<dir>/<stem><marker>.<ext>`, or `<dir>/<name><marker>` without extension.
pub fn marked_path(path: &Path, marker: &str) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy();
    let file_name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, marker, ext.to_string_lossy()),
        None => format!("{}{}", stem, marker),
    };
    Some(path.with_file_name(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tracker() -> IngestionTracker {
        IngestionTracker::new("_READED", 3)
    }

    #[test]
    fn marked_files_are_never_eligible() {
        let t = tracker();
        let path = Path::new("/models/car_READED.obj");
        for _ in 0..20 {
            assert!(!t.is_eligible(path));
            assert!(!t.try_claim(path));
        }
        assert!(t.is_marked(path));
    }

    #[test]
    fn marker_check_ignores_directory_names() {
        let t = tracker();
        assert!(t.is_eligible(Path::new("/tmp/_READED/car.obj")));
    }

    #[test]
    fn claim_excludes_until_restart() {
        let t = tracker();
        let path = Path::new("/models/car.obj");
        assert!(t.is_eligible(path));
        assert!(t.try_claim(path));
        assert!(!t.is_eligible(path));
        assert!(!t.try_claim(path));

        // A fresh tracker is a restart.
        let restarted = tracker();
        assert!(restarted.is_eligible(path));
    }

    #[test]
    fn mark_in_flight_is_idempotent() {
        let t = tracker();
        let path = Path::new("/models/car.obj");
        t.mark_in_flight(path);
        t.mark_in_flight(path);
        assert_eq!(t.in_flight_count(), 1);
        assert!(!t.is_eligible(path));
    }

    #[test]
    fn claims_match_by_file_name() {
        let t = tracker();
        assert!(t.try_claim(Path::new("/abs/inbox/car.obj")));
        assert!(!t.try_claim(Path::new("inbox/car.obj")));
    }

    #[test]
    fn marked_path_inserts_token_before_extension() {
        assert_eq!(
            marked_path(Path::new("/m/car.obj"), "_READED").unwrap(),
            PathBuf::from("/m/car_READED.obj")
        );
        assert_eq!(
            marked_path(Path::new("/m/car.v2.obj"), "_READED").unwrap(),
            PathBuf::from("/m/car.v2_READED.obj")
        );
        assert_eq!(
            marked_path(Path::new("/m/car"), "_READED").unwrap(),
            PathBuf::from("/m/car_READED")
        );
    }

    #[test]
    fn mark_processed_renames_without_touching_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("car.obj");
        let content = b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        fs::write(&path, content).unwrap();

        let t = tracker();
        assert!(t.try_claim(&path));
        let new_path = t.mark_processed(&path).unwrap();

        assert_eq!(new_path, dir.path().join("car_READED.obj"));
        assert!(!path.exists());
        assert_eq!(fs::read(&new_path).unwrap(), content);
        assert!(!t.is_in_flight(&path));
        assert!(!t.is_eligible(&new_path));
    }

    #[test]
    fn mark_processed_failure_keeps_file_in_flight() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.obj");

        let t = tracker();
        assert!(t.try_claim(&path));
        let err = t.mark_processed(&path).unwrap_err();
        assert!(matches!(err, TrackerError::Rename { .. }));
        assert!(t.is_in_flight(&path));
        assert!(!t.is_eligible(&path));
    }

    #[test]
    fn mark_processed_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("car.obj");
        let done = dir.path().join("car_READED.obj");
        fs::write(&path, "new").unwrap();
        fs::write(&done, "old").unwrap();

        let t = tracker();
        assert!(t.try_claim(&path));
        let err = t.mark_processed(&path).unwrap_err();
        assert!(matches!(err, TrackerError::TargetExists(_)));
        assert_eq!(fs::read_to_string(&done).unwrap(), "old");
        assert!(path.exists());
    }

    #[test]
    fn release_allows_retry_until_quarantined() {
        let t = tracker();
        let path = Path::new("/models/broken.obj");

        for attempt in 1..=3 {
            assert!(t.try_claim(path), "attempt {attempt} should be claimable");
            assert_eq!(t.release(path), attempt);
        }
        assert!(t.is_quarantined(path));
        assert!(!t.is_eligible(path));
        assert!(!t.try_claim(path));
    }

    #[test]
    fn changed_file_leaves_quarantine() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slow.obj");
        fs::write(&path, "").unwrap();
        let t = tracker();

        for _ in 0..3 {
            assert!(t.try_claim(&path));
            t.release(&path);
        }
        assert!(t.is_quarantined(&path));
        assert!(!t.try_claim(&path));

        // The producer finally writes the model.
        fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert!(!t.is_quarantined(&path));
        assert!(t.try_claim(&path));
        // A failure on the new contents starts a fresh count.
        assert_eq!(t.release(&path), 1);
        assert!(t.is_eligible(&path));
    }

    #[test]
    fn unlimited_attempts_never_quarantine() {
        let t = IngestionTracker::new("_READED", 0);
        let path = Path::new("/models/broken.obj");
        for _ in 0..50 {
            assert!(t.try_claim(path));
            t.release(path);
        }
        assert!(!t.is_quarantined(path));
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        use std::sync::Arc;

        let t = Arc::new(tracker());
        let path = PathBuf::from("/models/race.obj");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                let path = path.clone();
                std::thread::spawn(move || t.try_claim(&path))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
