//! Geo-fenced zone classification.
//!
//! `classify` is a pure function from a position and the advisory
//! signals covering it to a `ZoneStatus`: the highest risk level wins,
//! ties go to the nearest signal center, and a position outside every
//! signal falls back to the open-area default. `ZoneMonitor` wraps it
//! with the field behavior: evaluations are gated on displacement or a
//! periodic timer, risk upgrades apply immediately while downgrades
//! must dwell, and a slow or failing signal feed falls back to the last
//! cached signals instead of blocking.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, instrument, warn};

use crate::domain::{GeoPoint, RiskLevel, RiskSignal, ZoneStatus};
use crate::infra::{Result, RiskSignalSource, SqliteStore};

/// Label reported when no advisory signal covers the position.
pub const OPEN_AREA_LABEL: &str = "open-area";

/// Fold the signals covering `position` into a single status.
pub fn classify(
    position: &GeoPoint,
    signals: &[RiskSignal],
    evaluated_at: DateTime<Utc>,
) -> ZoneStatus {
    let mut best: Option<(&RiskSignal, f64)> = None;
    for signal in signals {
        if !signal.contains(position) {
            continue;
        }
        let distance = position.distance_meters(&signal.center);
        let better = match best {
            None => true,
            Some((current, current_distance)) => {
                signal.level > current.level
                    || (signal.level == current.level && distance < current_distance)
            }
        };
        if better {
            best = Some((signal, distance));
        }
    }

    match best {
        Some((signal, _)) => ZoneStatus::new(signal.label.clone(), signal.level, evaluated_at),
        None => ZoneStatus::new(OPEN_AREA_LABEL, RiskLevel::Safe, evaluated_at),
    }
}

/// Zone monitor configuration.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Periodic re-evaluation interval, catching signal changes while
    /// the tourist is stationary.
    pub period: Duration,

    /// Movement since the last evaluation that forces a new one.
    pub displacement_meters: f64,

    /// Upper bound on one signal-feed fetch.
    pub signal_timeout: Duration,

    /// How long a lower risk level must hold before a downgrade applies.
    pub downgrade_dwell: Duration,

    /// Radius around the position passed to the signal feed.
    pub signal_radius_meters: f64,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(15),
            displacement_meters: 25.0,
            signal_timeout: Duration::from_secs(2),
            downgrade_dwell: Duration::from_secs(60),
            signal_radius_meters: 5_000.0,
        }
    }
}

/// Monitor counters.
#[derive(Debug, Default, Clone)]
pub struct ZoneStats {
    pub evaluations: u64,
    pub upgrades: u64,
    pub downgrades: u64,
    pub signal_fetch_failures: u64,
}

#[derive(Default)]
struct MonitorState {
    current: Option<ZoneStatus>,
    /// Freshest observed position, fed to the periodic pass.
    latest_position: Option<GeoPoint>,
    /// Position at the last evaluation; displacement is measured from here.
    evaluated_position: Option<GeoPoint>,
    last_evaluated: Option<Instant>,
    cached_signals: Vec<RiskSignal>,
    /// Lower-level classification waiting out the dwell, with the instant
    /// it first appeared.
    candidate_downgrade: Option<(ZoneStatus, Instant)>,
    stats: ZoneStats,
}

struct Inner {
    config: ZoneConfig,
    store: SqliteStore,
    signals: Arc<dyn RiskSignalSource>,
    state: Mutex<MonitorState>,
    updates: watch::Sender<Option<ZoneStatus>>,
}

/// Handle to the zone monitor. Cheap to clone; all clones share the
/// same state.
#[derive(Clone)]
pub struct ZoneMonitor {
    inner: Arc<Inner>,
}

impl ZoneMonitor {
    pub fn new(config: ZoneConfig, store: SqliteStore, signals: Arc<dyn RiskSignalSource>) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                signals,
                state: Mutex::new(MonitorState::default()),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ZoneStatus>> {
        self.inner.updates.subscribe()
    }

    pub async fn current(&self) -> Option<ZoneStatus> {
        self.inner.state.lock().await.current.clone()
    }

    pub async fn stats(&self) -> ZoneStats {
        self.inner.state.lock().await.stats.clone()
    }

    /// Reload the last persisted status after a restart.
    pub async fn restore(&self) -> Result<Option<ZoneStatus>> {
        let snapshot = self.inner.store.load_zone_status().await?;
        if let Some(status) = snapshot.clone() {
            let mut state = self.inner.state.lock().await;
            state.current = Some(status.clone());
            drop(state);
            let _ = self.inner.updates.send(Some(status.clone()));
            info!(
                zone = %status.zone_label,
                level = %status.risk_level,
                "restored zone status from storage"
            );
        }
        Ok(snapshot)
    }

    /// Feed a new position. Evaluates when the displacement or period
    /// gate opens, otherwise just remembers the position.
    pub async fn observe(&self, position: GeoPoint) -> Result<Option<ZoneStatus>> {
        let due = {
            let mut state = self.inner.state.lock().await;
            state.latest_position = Some(position);
            match (state.evaluated_position, state.last_evaluated) {
                (Some(last), Some(at)) => {
                    position.distance_meters(&last) >= self.inner.config.displacement_meters
                        || at.elapsed() >= self.inner.config.period
                }
                _ => true,
            }
        };
        if !due {
            return Ok(None);
        }
        self.evaluate_at(position).await.map(Some)
    }

    /// Periodic re-evaluation loop. Catches advisory changes while the
    /// position holds still.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.inner.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("zone monitor started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let position = self.inner.state.lock().await.latest_position;
                    if let Some(position) = position {
                        if let Err(e) = self.evaluate_at(position).await {
                            warn!(error = %e, "periodic zone evaluation failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("zone monitor stopped");
    }

    /// One full evaluation: fetch signals (bounded), classify, apply the
    /// upgrade/downgrade policy, persist and publish on change.
    #[instrument(skip(self), fields(position = %position))]
    async fn evaluate_at(&self, position: GeoPoint) -> Result<ZoneStatus> {
        let signals = self.fetch_signals(&position).await;
        let now = Instant::now();
        let fresh = classify(&position, &signals, Utc::now());

        let mut state = self.inner.state.lock().await;
        state.stats.evaluations += 1;
        state.evaluated_position = Some(position);
        state.latest_position = Some(position);
        state.last_evaluated = Some(now);

        let apply = match state.current.clone() {
            None => true,
            Some(current) => match fresh.risk_level.cmp(&current.risk_level) {
                std::cmp::Ordering::Greater => {
                    state.candidate_downgrade = None;
                    state.stats.upgrades += 1;
                    true
                }
                std::cmp::Ordering::Equal => {
                    state.candidate_downgrade = None;
                    fresh.zone_label != current.zone_label
                }
                std::cmp::Ordering::Less => {
                    let held_since = match &state.candidate_downgrade {
                        Some((candidate, since))
                            if candidate.risk_level == fresh.risk_level =>
                        {
                            *since
                        }
                        _ => now,
                    };
                    if now.duration_since(held_since) >= self.inner.config.downgrade_dwell {
                        state.candidate_downgrade = None;
                        state.stats.downgrades += 1;
                        true
                    } else {
                        state.candidate_downgrade = Some((fresh.clone(), held_since));
                        false
                    }
                }
            },
        };

        if apply {
            state.current = Some(fresh.clone());
            self.inner.store.save_zone_status(&fresh).await?;
            drop(state);
            let _ = self.inner.updates.send(Some(fresh.clone()));
            info!(
                zone = %fresh.zone_label,
                level = %fresh.risk_level,
                "zone status changed"
            );
            Ok(fresh)
        } else {
            // current is always Some here; a fresh monitor applies
            // unconditionally above.
            let effective = state.current.clone().unwrap_or(fresh);
            Ok(effective)
        }
    }

    async fn fetch_signals(&self, position: &GeoPoint) -> Vec<RiskSignal> {
        let timeout = self.inner.config.signal_timeout;
        let fetch = self
            .inner
            .signals
            .signals_near(position, self.inner.config.signal_radius_meters);
        match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(signals)) => {
                let mut state = self.inner.state.lock().await;
                state.cached_signals = signals.clone();
                signals
            }
            Ok(Err(e)) => {
                warn!(error = %e, "risk signal fetch failed, using cached signals");
                let mut state = self.inner.state.lock().await;
                state.stats.signal_fetch_failures += 1;
                state.cached_signals.clone()
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "risk signal fetch timed out, using cached signals"
                );
                let mut state = self.inner.state.lock().await;
                state.stats.signal_fetch_failures += 1;
                state.cached_signals.clone()
            }
        }
    }
}

// ===== Tests =====
