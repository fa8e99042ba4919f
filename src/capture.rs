//! Periodic telemetry capture.
//!
//! On every tick the task reads the telemetry source, validates the
//! reading, stamps it into a sample, and appends it to the durable
//! queue. The sample's position also feeds the zone monitor so
//! displacement re-evaluation keeps up with movement. A full queue is
//! fatal: the task stops rather than drop data.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{DeviceId, DeviceTelemetrySample, SyncEnvelope};
use crate::infra::{EngineError, Result, SqliteStore, TelemetrySource};
use crate::zone::ZoneMonitor;

/// Capture task configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Cadence of telemetry reads.
    pub interval: Duration,

    /// Upper bound on one source read.
    pub read_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters for the capture loop.
#[derive(Debug, Default, Clone)]
pub struct CaptureStats {
    /// Samples validated and queued.
    pub captured: u64,

    /// Readings discarded by validation.
    pub skipped_invalid: u64,

    /// Ticks where the source had nothing to report.
    pub source_idle: u64,

    /// Source reads that failed or timed out.
    pub read_failures: u64,
}

struct Inner {
    config: CaptureConfig,
    device_id: DeviceId,
    store: SqliteStore,
    source: Arc<dyn TelemetrySource>,
    zone: ZoneMonitor,
    latest: watch::Sender<Option<DeviceTelemetrySample>>,
    stats: RwLock<CaptureStats>,
}

/// Handle to the capture task. Cheap to clone; all clones share the
/// same state.
#[derive(Clone)]
pub struct TelemetryCapture {
    inner: Arc<Inner>,
}

impl TelemetryCapture {
    pub fn new(
        config: CaptureConfig,
        device_id: DeviceId,
        store: SqliteStore,
        source: Arc<dyn TelemetrySource>,
        zone: ZoneMonitor,
    ) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                device_id,
                store,
                source,
                zone,
                latest,
                stats: RwLock::new(CaptureStats::default()),
            }),
        }
    }

    /// Watch the most recent sample.
    pub fn subscribe(&self) -> watch::Receiver<Option<DeviceTelemetrySample>> {
        self.inner.latest.subscribe()
    }

    pub fn latest(&self) -> Option<DeviceTelemetrySample> {
        self.inner.latest.borrow().clone()
    }

    pub async fn stats(&self) -> CaptureStats {
        self.inner.stats.read().await.clone()
    }

    /// Capture loop. Runs until shutdown or a fatal queue error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.inner.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            device_id = %self.inner.device_id,
            interval_secs = self.inner.config.interval.as_secs(),
            "telemetry capture started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("telemetry capture stopped");
                        return Ok(());
                    }
                    continue;
                }
            }
            self.capture_once().await?;
        }
    }

    /// One read-validate-queue pass. Source trouble is absorbed with a
    /// counter; enqueue failure is fatal and propagates.
    #[instrument(skip(self), fields(device_id = %self.inner.device_id))]
    pub async fn capture_once(&self) -> Result<()> {
        let read = tokio::time::timeout(self.inner.config.read_timeout, self.inner.source.read());
        let reading = match read.await {
            Ok(Ok(Some(reading))) => reading,
            Ok(Ok(None)) => {
                self.inner.stats.write().await.source_idle += 1;
                debug!("telemetry source idle");
                return Ok(());
            }
            Ok(Err(e)) => {
                self.inner.stats.write().await.read_failures += 1;
                warn!(error = %e, "telemetry read failed");
                return Ok(());
            }
            Err(_) => {
                self.inner.stats.write().await.read_failures += 1;
                warn!(
                    timeout_ms = self.inner.config.read_timeout.as_millis() as u64,
                    "telemetry read timed out"
                );
                return Ok(());
            }
        };

        if let Err(reason) = reading.validate() {
            self.inner.stats.write().await.skipped_invalid += 1;
            warn!(reason = %reason, "telemetry reading discarded");
            return Ok(());
        }

        let sample = DeviceTelemetrySample::capture(self.inner.device_id.clone(), reading);
        let envelope = SyncEnvelope::telemetry(sample.clone());
        match self.inner.store.enqueue(&envelope).await {
            Ok(_) => {
                self.inner.stats.write().await.captured += 1;
                debug!(
                    envelope_id = %envelope.envelope_id,
                    position = %sample.coordinates,
                    "telemetry sample queued"
                );
            }
            Err(e @ EngineError::QueueFull { .. }) => {
                error!(error = %e, "durable queue at capacity, halting capture");
                return Err(e);
            }
            Err(e) => {
                error!(error = %e, "failed to queue telemetry sample");
                return Err(e);
            }
        }

        if let Err(e) = self.inner.zone.observe(sample.coordinates).await {
            warn!(error = %e, "zone evaluation failed");
        }
        let _ = self.inner.latest.send(Some(sample));
        Ok(())
    }
}

// ===== Tests =====
