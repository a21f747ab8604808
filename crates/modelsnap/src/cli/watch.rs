//! `modelsnap watch`

use anyhow::{Context, Result};
use modelsnap_ingest::{Config, WatchLoop, WatchSummary};
use std::future::Future;
use tokio::sync::watch;
use tracing::{info, warn};

pub fn run(config: Config, once: bool) -> Result<()> {
    std::fs::create_dir_all(&config.work_dir).with_context(|| {
        format!(
            "Failed to create work directory: {}",
            config.work_dir.display()
        )
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("modelsnap")
        .build()
        .context("Failed to build tokio runtime")?;

    let summary = runtime.block_on(async move {
        let watch_loop =
            WatchLoop::with_defaults(config).context("Failed to set up watch loop")?;
        info!(endpoint = %watch_loop.config().upload.endpoint_url(), "Receiver");

        let summary = if once {
            watch_loop.run_once().await
        } else {
            let shutdown = shutdown_signal()?;
            watch_loop.run(shutdown).await
        };
        Ok::<_, anyhow::Error>(summary)
    })?;

    report(&summary);
    Ok(())
}

/// Resolves on the first SIGINT/SIGTERM (Ctrl+C on windows). A second signal
/// exits immediately.
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let (tx, mut rx) = watch::channel(false);

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
        std::thread::spawn(move || {
            let mut received = signals.forever();
            if let Some(sig) = received.next() {
                info!("Received signal {}, initiating shutdown...", sig);
                let _ = tx.send(true);
            }
            if let Some(sig) = received.next() {
                warn!("Received signal {} during shutdown, exiting now", sig);
                std::process::exit(130);
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            if *tx.borrow() {
                warn!("Received Ctrl+C during shutdown, exiting now");
                std::process::exit(130);
            }
            info!("Received Ctrl+C, initiating shutdown...");
            let _ = tx.send(true);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    Ok(async move {
        // A dropped sender also ends the wait.
        let _ = rx.wait_for(|stop| *stop).await;
    })
}

fn report(summary: &WatchSummary) {
    let ingest = &summary.ingest;
    let delivery = &summary.delivery;
    println!(
        "processed {} model(s): {} load failure(s), {} rename failure(s), {} capture failure(s)",
        ingest.accepted, ingest.load_failed, ingest.rename_failed, ingest.capture_failed
    );
    println!(
        "delivered {} archive(s) in {} attempt(s): {} upload failure(s), {} archive failure(s)",
        delivery.delivered, delivery.attempts, delivery.upload_failed, delivery.archive_failed
    );
    if summary.timed_out {
        println!("shutdown timed out; some batches were abandoned");
    }
}
