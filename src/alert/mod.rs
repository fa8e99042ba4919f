//! Emergency alert state machine.
//!
//! Drives a single alert through its lifecycle: a raise arms a short
//! countdown during which the tourist can cancel, activation acquires a
//! bounded location fix and commits the transition envelope atomically
//! with the durable snapshot, and resolution arrives either locally or
//! from the remote authority. At most one non-terminal alert exists at
//! any time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    AlertStatus, AlertTransition, AlertUpdate, EmergencyAlert, GeoPoint, SyncEnvelope, TouristId,
};
use crate::infra::{EngineError, LocationProvider, Result, SqliteStore};

/// Alert machine configuration.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Cancellation window between raise and activation.
    pub countdown: Duration,

    /// Upper bound on the wait for a location fix at activation.
    pub location_timeout: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(3),
            location_timeout: Duration::from_secs(5),
        }
    }
}

/// Alert machine counters.
#[derive(Debug, Default, Clone)]
pub struct AlertStats {
    pub raised: u64,
    pub activated: u64,
    pub cancelled: u64,
    pub resolved: u64,
    pub remote_updates: u64,
}

#[derive(Default)]
struct AlertState {
    current: Option<EmergencyAlert>,
    /// Bumped on every raise and cancel so a stale countdown task can
    /// detect it lost the race and back off.
    generation: u64,
    stats: AlertStats,
}

struct Inner {
    config: AlertConfig,
    tourist_id: TouristId,
    store: SqliteStore,
    location: Arc<dyn LocationProvider>,
    state: Mutex<AlertState>,
    updates: watch::Sender<Option<EmergencyAlert>>,
}

/// Handle to the alert state machine. Cheap to clone; all clones share
/// the same state.
#[derive(Clone)]
pub struct AlertMachine {
    inner: Arc<Inner>,
}

impl AlertMachine {
    pub fn new(
        config: AlertConfig,
        tourist_id: TouristId,
        store: SqliteStore,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                tourist_id,
                store,
                location,
                state: Mutex::new(AlertState::default()),
                updates,
            }),
        }
    }

    /// Watch the alert as it moves through its lifecycle.
    pub fn subscribe(&self) -> watch::Receiver<Option<EmergencyAlert>> {
        self.inner.updates.subscribe()
    }

    pub async fn current(&self) -> Option<EmergencyAlert> {
        self.inner.state.lock().await.current.clone()
    }

    pub async fn stats(&self) -> AlertStats {
        self.inner.state.lock().await.stats.clone()
    }

    /// Reload the last persisted alert after a restart. A non-terminal
    /// snapshot stays outstanding and keeps blocking new raises.
    pub async fn restore(&self) -> Result<Option<EmergencyAlert>> {
        let snapshot = self.inner.store.load_alert_snapshot().await?;
        if let Some(alert) = snapshot.clone() {
            let mut state = self.inner.state.lock().await;
            state.current = Some(alert.clone());
            drop(state);
            let _ = self.inner.updates.send(Some(alert.clone()));
            info!(
                alert_id = %alert.alert_id,
                status = %alert.status,
                "restored last alert from storage"
            );
        }
        Ok(snapshot)
    }

    /// Raise a new alert. It arms immediately and activates after the
    /// countdown unless cancelled first.
    #[instrument(skip(self), fields(tourist_id = %self.inner.tourist_id))]
    pub async fn raise(&self) -> Result<EmergencyAlert> {
        let mut state = self.inner.state.lock().await;
        if let Some(existing) = state.current.as_ref() {
            if !existing.is_terminal() {
                return Err(EngineError::AlertAlreadyOutstanding {
                    tourist_id: existing.tourist_id,
                    status: existing.status,
                });
            }
        }

        let alert = EmergencyAlert::pending(self.inner.tourist_id, Utc::now());
        state.generation += 1;
        let generation = state.generation;
        state.current = Some(alert.clone());
        state.stats.raised += 1;
        drop(state);

        let _ = self.inner.updates.send(Some(alert.clone()));
        info!(
            alert_id = %alert.alert_id,
            countdown_ms = self.inner.config.countdown.as_millis() as u64,
            "emergency alert armed"
        );

        let machine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(machine.inner.config.countdown).await;
            if let Err(e) = machine.activate(generation).await {
                error!(error = %e, "alert activation failed");
            }
        });

        Ok(alert)
    }

    /// Cancel the alert during its countdown. Only legal while pending;
    /// cancellation is local and nothing is queued for sync.
    #[instrument(skip(self))]
    pub async fn cancel(&self) -> Result<EmergencyAlert> {
        let mut state = self.inner.state.lock().await;
        let Some(alert) = state.current.as_mut() else {
            return Err(EngineError::InvalidTransition(
                "no alert to cancel".to_string(),
            ));
        };
        if alert.status != AlertStatus::Pending {
            return Err(EngineError::InvalidTransition(format!(
                "cannot cancel alert in status {}",
                alert.status
            )));
        }

        let mut updated = alert.clone();
        updated
            .transition(AlertStatus::Cancelled, Utc::now())
            .map_err(EngineError::InvalidTransition)?;
        self.inner.store.save_alert_snapshot(&updated).await?;

        *alert = updated.clone();
        state.generation += 1;
        state.stats.cancelled += 1;
        drop(state);

        let _ = self.inner.updates.send(Some(updated.clone()));
        info!(alert_id = %updated.alert_id, "emergency alert cancelled during countdown");
        Ok(updated)
    }

    /// Resolve the outstanding alert locally. Queues the terminal
    /// transition for the remote authority.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> Result<EmergencyAlert> {
        let mut state = self.inner.state.lock().await;
        let Some(alert) = state.current.as_mut() else {
            return Err(EngineError::InvalidTransition(
                "no alert to resolve".to_string(),
            ));
        };
        if alert.is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "alert already terminal in status {}",
                alert.status
            )));
        }

        let from = alert.status;
        let mut updated = alert.clone();
        updated
            .transition(AlertStatus::Resolved, Utc::now())
            .map_err(EngineError::InvalidTransition)?;

        let envelope = SyncEnvelope::alert_transition(AlertTransition {
            alert_id: updated.alert_id,
            tourist_id: updated.tourist_id,
            from,
            to: AlertStatus::Resolved,
            coordinates: updated.coordinates,
            occurred_at: updated.last_transition_at,
        });
        self.inner
            .store
            .commit_alert_transition(Some(&envelope), &updated)
            .await?;

        *alert = updated.clone();
        state.stats.resolved += 1;
        drop(state);

        let _ = self.inner.updates.send(Some(updated.clone()));
        info!(
            alert_id = %updated.alert_id,
            envelope_id = %envelope.envelope_id,
            "emergency alert resolved locally"
        );
        Ok(updated)
    }

    /// Apply a status update pushed by the remote authority. The remote
    /// already owns the change, so nothing is queued back; stale or
    /// mismatched updates are dropped.
    #[instrument(skip(self, update), fields(alert_id = %update.alert_id, status = %update.status))]
    pub async fn apply_remote(&self, update: AlertUpdate) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let Some(alert) = state.current.as_mut() else {
            debug!(alert_id = %update.alert_id, "remote update with no local alert, ignoring");
            return Ok(());
        };
        if alert.alert_id != update.alert_id {
            debug!(
                alert_id = %update.alert_id,
                current = %alert.alert_id,
                "remote update for a different alert, ignoring"
            );
            return Ok(());
        }
        if alert.status == update.status || alert.is_terminal() {
            return Ok(());
        }
        if !alert.status.can_transition_to(update.status) {
            warn!(
                alert_id = %update.alert_id,
                from = %alert.status,
                to = %update.status,
                "remote update would be an illegal transition, ignoring"
            );
            return Ok(());
        }

        let mut updated = alert.clone();
        updated
            .transition(update.status, update.occurred_at)
            .map_err(EngineError::InvalidTransition)?;
        self.inner.store.save_alert_snapshot(&updated).await?;

        *alert = updated.clone();
        state.stats.remote_updates += 1;
        drop(state);

        let _ = self.inner.updates.send(Some(updated.clone()));
        info!(
            alert_id = %updated.alert_id,
            status = %updated.status,
            "applied remote alert update"
        );
        Ok(())
    }

    /// Countdown expiry. Fetches a bounded location fix, commits the
    /// activation envelope and snapshot in one transaction, then
    /// publishes the active alert.
    async fn activate(&self, generation: u64) -> Result<()> {
        // Resolve the fix before taking the lock so a cancel is never
        // blocked behind the location wait.
        let coordinates = self.bounded_location_fix().await;

        let mut state = self.inner.state.lock().await;
        if state.generation != generation {
            debug!("countdown superseded, skipping activation");
            return Ok(());
        }
        let Some(alert) = state.current.as_mut() else {
            return Ok(());
        };
        if alert.status != AlertStatus::Pending {
            return Ok(());
        }

        let mut updated = alert.clone();
        updated.coordinates = coordinates;
        updated
            .transition(AlertStatus::Active, Utc::now())
            .map_err(EngineError::InvalidTransition)?;

        let envelope = SyncEnvelope::alert_transition(AlertTransition {
            alert_id: updated.alert_id,
            tourist_id: updated.tourist_id,
            from: AlertStatus::Pending,
            to: AlertStatus::Active,
            coordinates: updated.coordinates,
            occurred_at: updated.last_transition_at,
        });
        self.inner
            .store
            .commit_alert_transition(Some(&envelope), &updated)
            .await?;

        *alert = updated.clone();
        state.stats.activated += 1;
        drop(state);

        let _ = self.inner.updates.send(Some(updated.clone()));
        info!(
            alert_id = %updated.alert_id,
            envelope_id = %envelope.envelope_id,
            has_coordinates = updated.coordinates.is_some(),
            "emergency alert active"
        );
        Ok(())
    }

    async fn bounded_location_fix(&self) -> Option<GeoPoint> {
        let timeout = self.inner.config.location_timeout;
        match tokio::time::timeout(timeout, self.inner.location.current_position()).await {
            Ok(Ok(position)) if position.is_valid() => Some(position),
            Ok(Ok(position)) => {
                warn!(%position, "discarding out-of-range location fix");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "location fix failed, activating without coordinates");
                None
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "location fix timed out, activating without coordinates"
                );
                None
            }
        }
    }
}

// ===== Tests =====
