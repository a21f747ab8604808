//! Directory listing for the rescan source

use std::io;
use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap_or(path));
        }
    }
    path.to_path_buf()
}

/// Case-insensitive extension match. `ext` has no leading dot.
pub fn matches_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Regular files directly inside `dir` with a matching extension, sorted.
///
/// A missing directory is reported as `NotFound`; callers treat that as an
/// empty listing.
pub fn list_candidates(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            // Entry vanished between readdir and stat.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        let path = entry.path();
        if path.is_file() && matches_extension(&path, ext) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
