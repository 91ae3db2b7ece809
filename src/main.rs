mod bluetooth;
mod config;
mod database;
mod download;
mod error;
mod models;
mod utils;

use log::{error, info, warn};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, Duration};

use bluetooth::BluerTransport;
use config::GadgetConfig;
use database::{FileSink, PostgresSink, RecordSink};
use download::{FileCursorStore, GadgetDownloader};
use utils::{format_datetime, next_trigger_delay};

async fn main_loop(
    config: GadgetConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Smart Gadget download service");

    let transport =
        BluerTransport::new(config.adapter.as_deref(), config.discovery_timeout).await?;

    let sink: Arc<dyn RecordSink> = match &config.database_url {
        Some(url) => Arc::new(PostgresSink::new(url, config.db_max_retries)),
        None => Arc::new(FileSink::new(&config.log_file)),
    };
    let cursor = FileCursorStore::for_gadget(&config.state_dir, &config.gadget_address);
    info!("Resume cursor kept in {}", cursor.path().display());

    let downloader = Arc::new(GadgetDownloader::new(
        Arc::new(transport),
        Arc::new(cursor),
        sink,
        config.download,
        shutdown.clone(),
    ));

    // Held for the whole duration of a cycle; at most one runs at a time
    let run_lock = Arc::new(Mutex::new(()));

    loop {
        let delay = next_trigger_delay(
            &OffsetDateTime::now_utc(),
            config.download_period_secs,
            config.trigger_offset_secs,
        );
        let delay = Duration::from_millis(delay.whole_milliseconds().max(0) as u64);

        tokio::select! {
            _ = sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let permit = match run_lock.clone().try_lock_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Previous download cycle still running, skipping this trigger");
                continue;
            }
        };

        let downloader = downloader.clone();
        let address = config.gadget_address.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let started = OffsetDateTime::now_utc();
            info!("Download cycle started at: {}", format_datetime(&started));

            match downloader.run_download_cycle(&address).await {
                Ok(count) => info!("Download cycle finished, {} new readings", count),
                Err(e) => error!("Download cycle failed: {}", e),
            }
        });
    }

    // Let an in-flight cycle finish its teardown before exiting
    let _idle = run_lock.lock().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match GadgetConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    // Handle Ctrl+C gracefully
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing current cycle"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        let _ = tx.send(true);
    });

    match main_loop(config, rx).await {
        Ok(_) => info!("Program terminated by user. Exiting gracefully."),
        Err(e) => error!("Fatal error: {}", e),
    }

    Ok(())
}
