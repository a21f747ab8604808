//! `modelsnap upload`: one send, no retries.

use anyhow::{bail, Context, Result};
use modelsnap_ingest::{Config, Uploader};
use std::path::Path;
use tracing::info;

pub fn run(config: &Config, archive: &Path) -> Result<()> {
    if !archive.is_file() {
        bail!("Archive not found: {}", archive.display());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async {
        let uploader =
            Uploader::from_config(&config.upload).context("Failed to create uploader")?;
        info!(endpoint = %uploader.endpoint(), archive = %archive.display(), "Uploading");
        let ack = uploader
            .send(archive)
            .await
            .with_context(|| format!("Upload of {} failed", archive.display()))?;
        println!("{} {}", ack.status, ack.body.trim());
        Ok(())
    })
}
