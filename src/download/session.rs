/// One end-to-end download cycle against a single gadget
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

use crate::bluetooth::gadget::{
    self, encode_u64_ms, parse_logging_interval, parse_u64_le, DOWNLOAD_START, DOWNLOAD_STOP,
};
use crate::bluetooth::{GattSession, GattTransport, SessionGuard};
use crate::database::RecordSink;
use crate::download::completion::{CompletionTracker, WaitOutcome};
use crate::download::cursor::CursorStore;
use crate::download::reconstruct::reconstruct;
use crate::download::stream::{SampleStream, StreamCollector};
use crate::error::{SessionError, TransportError};
use crate::models::{ClockOffset, DownloadWindow, GadgetReading, Quantity};
use crate::utils::{datetime_to_ms, format_datetime, ms_to_datetime};

const MAX_CLOCK_LEAD_MS: i64 = 3_600_000; // device newest sample may not be > 1 h ahead of host

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Syncing,
    Subscribing,
    AwaitingCompletion,
    Teardown,
    Reconstructing,
    Persisting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Syncing => "syncing",
            SessionState::Subscribing => "subscribing",
            SessionState::AwaitingCompletion => "awaiting completion",
            SessionState::Teardown => "teardown",
            SessionState::Reconstructing => "reconstructing",
            SessionState::Persisting => "persisting",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadSettings {
    /// Upper bound on the wait for both end-of-stream sentinels
    pub completion_timeout: Duration,
    /// Re-requested margin before the cursor
    pub overlap_ms: i64,
    /// Furthest back from now a request may reach, cursor or not
    pub bootstrap_lookback_ms: i64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            completion_timeout: Duration::from_secs(55),
            overlap_ms: 9_000,
            bootstrap_lookback_ms: 120_000,
        }
    }
}

/// Start of the range to request from the gadget
///
/// `max(now - lookback, cursor) - overlap`: a cursor inside the lookback
/// resumes from where the last cycle ended, an older or missing one is
/// clamped to the lookback.
pub fn compute_download_window(
    now_ms: i64,
    cursor: Option<i64>,
    settings: &DownloadSettings,
) -> DownloadWindow {
    let floor = now_ms - settings.bootstrap_lookback_ms;
    let base = cursor.map_or(floor, |cursor| cursor.max(floor));
    DownloadWindow {
        start_ms: base - settings.overlap_ms,
        overlap_ms: settings.overlap_ms,
    }
}

/// What the device side of a cycle produced
struct Exchange {
    interval_ms: u32,
    offset: ClockOffset,
}

pub struct GadgetDownloader {
    transport: Arc<dyn GattTransport>,
    cursor: Arc<dyn CursorStore>,
    sink: Arc<dyn RecordSink>,
    settings: DownloadSettings,
    shutdown: watch::Receiver<bool>,
}

impl GadgetDownloader {
    pub fn new(
        transport: Arc<dyn GattTransport>,
        cursor: Arc<dyn CursorStore>,
        sink: Arc<dyn RecordSink>,
        settings: DownloadSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            cursor,
            sink,
            settings,
            shutdown,
        }
    }

    /// Download, reconstruct and persist everything logged since the cursor
    ///
    /// The device session is closed on every path before any processing
    /// starts. Returns the number of readings written to the sink.
    pub async fn run_download_cycle(&self, address: &str) -> Result<usize, SessionError> {
        let mut state = SessionState::Idle;
        transition(address, &mut state, SessionState::Connecting);

        let session = match self.transport.connect(address).await {
            Ok(session) => session,
            Err(e) => {
                transition(address, &mut state, SessionState::Teardown);
                transition(address, &mut state, SessionState::Idle);
                return Err(e.into());
            }
        };
        let mut guard = SessionGuard::new(session);

        // Fresh buffers and latches for every cycle
        let tracker = Arc::new(CompletionTracker::new());
        let temperatures = SampleStream::new();
        let humidities = SampleStream::new();

        let exchange = self
            .exchange(address, &mut state, &mut guard, &tracker, &temperatures, &humidities)
            .await;

        transition(address, &mut state, SessionState::Teardown);
        if let Err(e) = guard.release().await {
            warn!("Disconnect from {} failed: {}", address, e);
        }
        info!("Disconnected from {}", address);

        let exchange = match exchange {
            Ok(exchange) => exchange,
            Err(e) => {
                transition(address, &mut state, SessionState::Idle);
                return Err(e.into());
            }
        };

        let temperatures = temperatures.take();
        let humidities = humidities.take();
        if temperatures.is_empty() && humidities.is_empty() {
            info!("No new samples on {}", address);
            transition(address, &mut state, SessionState::Idle);
            return Ok(0);
        }

        transition(address, &mut state, SessionState::Reconstructing);
        let reconstruction = reconstruct(
            &temperatures,
            &humidities,
            exchange.interval_ms,
            &exchange.offset,
        );

        let Some(newest_ms) = reconstruction.newest_ms() else {
            warn!("Samples from {} could not be paired", address);
            transition(address, &mut state, SessionState::Idle);
            return Ok(0);
        };

        if let Some((t, h)) = reconstruction.mismatch {
            info!(
                "Dropped {} unpaired samples from {}",
                t.max(h) - t.min(h),
                address
            );
        }

        transition(address, &mut state, SessionState::Persisting);
        let persisted = self.persist(address, &reconstruction.readings, newest_ms).await;
        transition(address, &mut state, SessionState::Idle);
        persisted
    }

    /// Steps between connect and teardown; any error here still gets a teardown
    async fn exchange(
        &self,
        address: &str,
        state: &mut SessionState,
        guard: &mut SessionGuard,
        tracker: &Arc<CompletionTracker>,
        temperatures: &SampleStream,
        humidities: &SampleStream,
    ) -> Result<Exchange, TransportError> {
        let session = guard.session()?;

        transition(address, state, SessionState::Syncing);
        let interval_ms = parse_logging_interval(
            &session
                .read_characteristic(gadget::LOGGER_INTERVAL_MS)
                .await?,
        )?;
        debug!("Logging interval on {}: {} ms", address, interval_ms);

        transition(address, state, SessionState::Subscribing);
        let offset = self
            .download(address, state, session, tracker, temperatures, humidities)
            .await;

        // From the first subscribe on, the download is stopped on every path
        self.stop_download(address, session).await;

        Ok(Exchange {
            interval_ms,
            offset: offset?,
        })
    }

    /// Subscribe both streams, sync the clock, request the window and wait
    async fn download(
        &self,
        address: &str,
        state: &mut SessionState,
        session: &mut dyn GattSession,
        tracker: &Arc<CompletionTracker>,
        temperatures: &SampleStream,
        humidities: &SampleStream,
    ) -> Result<ClockOffset, TransportError> {
        session
            .subscribe(
                gadget::TEMPERATURE_DATA,
                StreamCollector::new(Quantity::Temperature, temperatures.clone(), tracker.clone())
                    .into_callback(),
            )
            .await?;
        session
            .subscribe(
                gadget::HUMIDITY_DATA,
                StreamCollector::new(Quantity::Humidity, humidities.clone(), tracker.clone())
                    .into_callback(),
            )
            .await?;

        let offset = sync_clock(session).await?;
        info!(
            "Synced {} at {} (drift {} ms)",
            address,
            format_datetime(&offset.host_now),
            offset.drift_ms()
        );

        let cursor = self.cursor.read().await;
        let window = compute_download_window(offset.host_now_ms, cursor, &self.settings);
        info!(
            "Requesting samples from {} since {} (overlap {} ms)",
            address,
            format_datetime(&ms_to_datetime(window.start_ms)),
            window.overlap_ms
        );
        session
            .write_characteristic(
                gadget::OLDEST_TIMESTAMP_MS,
                &encode_u64_ms(window.start_ms.max(0) as u64),
            )
            .await?;
        session
            .write_characteristic(gadget::START_LOGGER_DOWNLOAD, &[DOWNLOAD_START])
            .await?;

        transition(address, state, SessionState::AwaitingCompletion);
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            outcome = tracker.wait_for_both(self.settings.completion_timeout) => {
                if outcome == WaitOutcome::TimedOut {
                    warn!(
                        "Download from {} did not complete within {:?} (temperature done: {}, humidity done: {}), keeping partial data",
                        address,
                        self.settings.completion_timeout,
                        tracker.latch(Quantity::Temperature).is_set(),
                        tracker.latch(Quantity::Humidity).is_set()
                    );
                }
            }
            _ = shutdown_requested(&mut shutdown) => {
                warn!("Shutdown requested, interrupting download from {}", address);
            }
        }

        Ok(offset)
    }

    /// Best-effort stop and unsubscribe; failures here must not cost us the data
    async fn stop_download(&self, address: &str, session: &mut dyn GattSession) {
        if let Err(e) = session
            .write_characteristic(gadget::START_LOGGER_DOWNLOAD, &[DOWNLOAD_STOP])
            .await
        {
            warn!("Failed to stop download on {}: {}", address, e);
        }
        for id in [gadget::TEMPERATURE_DATA, gadget::HUMIDITY_DATA] {
            if let Err(e) = session.unsubscribe(id).await {
                warn!("Failed to unsubscribe {} on {}: {}", id, address, e);
            }
        }
    }

    async fn persist(
        &self,
        address: &str,
        readings: &[GadgetReading],
        newest_ms: i64,
    ) -> Result<usize, SessionError> {
        if let Err(e) = self.sink.append(address, readings).await {
            error!("Failed to store readings from {}: {}", address, e);
            return Err(e.into());
        }
        info!("Stored {} readings from {}", readings.len(), address);

        match self.cursor.write(newest_ms).await {
            Ok(()) => info!(
                "Cursor for {} advanced to {}",
                address,
                format_datetime(&ms_to_datetime(newest_ms))
            ),
            // Next cycle re-requests from the old cursor; duplicates, not loss
            Err(e) => error!("Failed to persist cursor for {}: {}", address, e),
        }

        Ok(readings.len())
    }
}

/// Write host time to the gadget and read back its newest sample time
async fn sync_clock(session: &mut dyn GattSession) -> Result<ClockOffset, TransportError> {
    let host_now = time::OffsetDateTime::now_utc();
    let host_now_ms = datetime_to_ms(&host_now);

    session
        .write_characteristic(gadget::SYNC_TIME_MS, &encode_u64_ms(host_now_ms as u64))
        .await?;

    let raw = session
        .read_characteristic(gadget::NEWEST_TIMESTAMP_MS)
        .await?;
    let device_newest_ms = parse_u64_le(gadget::NEWEST_TIMESTAMP_MS, &raw)?;

    check_device_clock(host_now_ms, device_newest_ms)?;

    Ok(ClockOffset {
        host_now_ms,
        host_now,
        device_newest_ms,
    })
}

/// Reject device timestamps that can't anchor a reconstruction
fn check_device_clock(host_now_ms: i64, device_newest_ms: u64) -> Result<(), TransportError> {
    let plausible = device_newest_ms > 0
        && i64::try_from(device_newest_ms)
            .map(|ms| ms <= host_now_ms + MAX_CLOCK_LEAD_MS)
            .unwrap_or(false);

    if plausible {
        Ok(())
    } else {
        Err(TransportError::UnexpectedValue {
            uuid: gadget::NEWEST_TIMESTAMP_MS,
            value: device_newest_ms,
        })
    }
}

/// Resolves once shutdown is signalled; never resolves if the signal source is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn transition(address: &str, state: &mut SessionState, next: SessionState) {
    debug!("Session {}: {} -> {}", address, state, next);
    *state = next;
}
