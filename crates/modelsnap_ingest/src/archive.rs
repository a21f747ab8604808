//! Snapshot archiver
//!
//! Packs every file under a batch's snapshot directory into one zip. The
//! archive is always rebuilt from scratch:
//! - entries sorted by relative path, canonical 1980-01-01 timestamps, so an
//!   unchanged directory yields byte-identical archives
//! - an empty directory yields a valid empty archive
//! - the zip is assembled in memory and persisted through a temp file next to
//!   the destination, so readers never observe a partial archive

use crate::error::ArchiveError;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Media type sent with the archive.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Rebuild `archive_path` from the current contents of `source_dir`.
///
/// Returns the number of entries written.
pub fn build(source_dir: &Path, archive_path: &Path) -> Result<usize, ArchiveError> {
    if archive_path.exists() {
        fs::remove_file(archive_path).map_err(|source| ArchiveError::Stale {
            path: archive_path.to_path_buf(),
            source,
        })?;
    }

    fs::read_dir(source_dir).map_err(|source| ArchiveError::Source {
        path: source_dir.to_path_buf(),
        source,
    })?;

    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path() == archive_path {
            continue;
        }
        let rel_path = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = fs::read(entry.path()).map_err(|source| ArchiveError::Source {
            path: entry.path().to_path_buf(),
            source,
        })?;
        files.push((rel_path, content));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let write_err = |source| ArchiveError::Write {
        path: archive_path.to_path_buf(),
        source,
    };

    let mut archive = Vec::new();
    {
        let mut zip = ZipWriter::new(std::io::Cursor::new(&mut archive));
        let options = SimpleFileOptions::default()
            .last_modified_time(zip::DateTime::default())
            .compression_method(zip::CompressionMethod::Deflated);

        for (name, content) in &files {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(content).map_err(write_err)?;
        }
        zip.finish()?;
    }

    let parent = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(write_err)?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(&archive).map_err(write_err)?;
    tmp.persist(archive_path).map_err(|e| write_err(e.error))?;

    debug!(
        archive = %archive_path.display(),
        entries = files.len(),
        bytes = archive.len(),
        "Archive built"
    );
    Ok(files.len())
}
