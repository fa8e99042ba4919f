//! Sync engine.
//!
//! Drains the durable queue to the remote authority whenever the device
//! is online. Delivery is strictly in enqueue order and at-least-once: an
//! envelope leaves the queue only on a positive `Accepted` or `Duplicate`
//! outcome, so an ambiguous delivery is re-sent and settled by the
//! authority's envelope-id dedup. Transport failures and fresh rejections
//! stop the current batch and back off exponentially; an envelope
//! rejected more often than the bound is parked in the dead-letter table
//! so the head of the queue can advance.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Connectivity, SubmitOutcome, SyncEnvelope};
use crate::infra::{BackoffPolicy, QueuedEnvelope, RemoteAuthority, Result, SqliteStore};

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Most envelopes submitted per drain cycle.
    pub batch_size: u32,

    /// Idle poll interval while online with an empty queue.
    pub poll_interval: Duration,

    /// Backoff schedule after a failed cycle.
    pub backoff: BackoffPolicy,

    /// Rejections tolerated per envelope before it is dead-lettered.
    pub max_reject_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
            max_reject_attempts: 3,
        }
    }
}

/// Externally observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEngineState {
    /// Offline, or online with nothing queued.
    Idle,
    /// Actively submitting envelopes.
    Draining,
    /// Waiting out a delay after a failed cycle.
    Backoff,
}

impl SyncEngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEngineState::Idle => "idle",
            SyncEngineState::Draining => "draining",
            SyncEngineState::Backoff => "backoff",
        }
    }
}

impl fmt::Display for SyncEngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery counters.
#[derive(Debug, Default, Clone)]
pub struct SyncStats {
    pub delivered: u64,
    pub duplicates: u64,
    pub rejections: u64,
    pub dead_lettered: u64,
    pub transport_failures: u64,
}

enum DrainOutcome {
    /// Queue was empty.
    Empty,
    /// Every envelope in the batch settled or was parked.
    Completed,
    /// The cycle stopped early; `progressed` records whether a prefix
    /// settled before the failure.
    Stalled { progressed: bool },
}

struct Inner {
    config: SyncConfig,
    store: SqliteStore,
    authority: Arc<dyn RemoteAuthority>,
    connectivity: watch::Receiver<Connectivity>,
    state: watch::Sender<SyncEngineState>,
    stats: RwLock<SyncStats>,
}

/// Handle to the sync engine. Cheap to clone; all clones share the same
/// state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        store: SqliteStore,
        authority: Arc<dyn RemoteAuthority>,
        connectivity: watch::Receiver<Connectivity>,
    ) -> Self {
        let (state, _) = watch::channel(SyncEngineState::Idle);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                authority,
                connectivity,
                state,
                stats: RwLock::new(SyncStats::default()),
            }),
        }
    }

    pub fn state(&self) -> SyncEngineState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncEngineState> {
        self.inner.state.subscribe()
    }

    pub async fn stats(&self) -> SyncStats {
        self.inner.stats.read().await.clone()
    }

    /// Drive the drain loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut connectivity = self.inner.connectivity.clone();
        let mut failures: u32 = 0;
        info!("sync engine started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Offline: sit idle until the edge back to online.
            if !connectivity.borrow_and_update().is_online() {
                self.set_state(SyncEngineState::Idle);
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            self.set_state(SyncEngineState::Draining);
            match self.drain_batch().await {
                Ok(DrainOutcome::Empty) => {
                    failures = 0;
                    self.set_state(SyncEngineState::Idle);
                    tokio::select! {
                        _ = tokio::time::sleep(self.inner.config.poll_interval) => {}
                        changed = connectivity.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(DrainOutcome::Completed) => {
                    failures = 0;
                }
                Ok(DrainOutcome::Stalled { progressed }) => {
                    // A settled prefix restarts the backoff schedule.
                    if progressed {
                        failures = 0;
                    }
                    if !self
                        .back_off(&mut failures, &mut connectivity, &mut shutdown)
                        .await
                    {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "sync cycle failed");
                    if !self
                        .back_off(&mut failures, &mut connectivity, &mut shutdown)
                        .await
                    {
                        break;
                    }
                }
            }
        }

        self.set_state(SyncEngineState::Idle);
        info!("sync engine stopped");
    }

    /// Submit one batch from the head of the queue, acknowledging each
    /// envelope individually as the authority settles it.
    async fn drain_batch(&self) -> Result<DrainOutcome> {
        let batch = self
            .inner
            .store
            .peek_batch(self.inner.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(DrainOutcome::Empty);
        }

        let mut progressed = false;
        for queued in batch {
            if !self.submit_one(queued).await? {
                return Ok(DrainOutcome::Stalled { progressed });
            }
            progressed = true;
        }

        Ok(DrainOutcome::Completed)
    }

    /// Deliver a single envelope. Returns `true` when the batch may
    /// continue past it (settled or parked), `false` to stop the cycle.
    #[instrument(skip(self, queued), fields(envelope_id = %queued.envelope.envelope_id))]
    async fn submit_one(&self, queued: QueuedEnvelope) -> Result<bool> {
        let mut envelope: SyncEnvelope = queued.envelope;
        let attempt = self.inner.store.record_attempt(&envelope.envelope_id).await?;
        envelope.attempt_count = attempt;

        match self.inner.authority.submit_envelope(&envelope).await {
            Ok(SubmitOutcome::Accepted) => {
                self.inner.store.acknowledge(&envelope.envelope_id).await?;
                self.inner.stats.write().await.delivered += 1;
                debug!(
                    envelope_id = %envelope.envelope_id,
                    attempt,
                    "envelope delivered"
                );
                Ok(true)
            }
            Ok(SubmitOutcome::Duplicate) => {
                // A previous delivery made it through before the ack was
                // lost; the authority has it, so the queue lets go.
                self.inner.store.acknowledge(&envelope.envelope_id).await?;
                self.inner.stats.write().await.duplicates += 1;
                info!(
                    envelope_id = %envelope.envelope_id,
                    attempt,
                    "envelope already held remotely, acknowledged locally"
                );
                Ok(true)
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                let rejections = self
                    .inner
                    .store
                    .record_rejection(&envelope.envelope_id)
                    .await?;
                self.inner.stats.write().await.rejections += 1;
                if rejections >= self.inner.config.max_reject_attempts {
                    self.inner
                        .store
                        .dead_letter(&envelope.envelope_id, &reason)
                        .await?;
                    self.inner.stats.write().await.dead_lettered += 1;
                    warn!(
                        envelope_id = %envelope.envelope_id,
                        attempt,
                        rejections,
                        reason = %reason,
                        "envelope dead-lettered after repeated rejections"
                    );
                    Ok(true)
                } else {
                    warn!(
                        envelope_id = %envelope.envelope_id,
                        attempt,
                        rejections,
                        reason = %reason,
                        "envelope rejected by authority, will retry"
                    );
                    Ok(false)
                }
            }
            Err(e) => {
                self.inner.stats.write().await.transport_failures += 1;
                warn!(
                    envelope_id = %envelope.envelope_id,
                    attempt,
                    error = %e,
                    "envelope delivery failed, keeping queued"
                );
                Ok(false)
            }
        }
    }

    /// Wait out the backoff delay. Connectivity changes and shutdown both
    /// cut the wait short. Returns `false` when the loop should stop.
    async fn back_off(
        &self,
        failures: &mut u32,
        connectivity: &mut watch::Receiver<Connectivity>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        let delay = self.inner.config.backoff.delay_for_attempt(*failures);
        *failures = failures.saturating_add(1);
        self.set_state(SyncEngineState::Backoff);
        info!(
            delay_ms = delay.as_millis() as u64,
            consecutive_failures = *failures,
            "sync engine backing off"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            changed = connectivity.changed() => changed.is_ok(),
            changed = shutdown.changed() => changed.is_ok(),
        }
    }

    fn set_state(&self, next: SyncEngineState) {
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(state = next.as_str(), "sync engine state changed");
        }
    }
}

// ===== Tests =====
