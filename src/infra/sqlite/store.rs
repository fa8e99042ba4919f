//! SQLite-backed durable store for the field engine.
//!
//! One local database holds the outbound sync queue, the dead-letter
//! parking table, restart snapshots (last alert, last zone status) and
//! digital identity records. Queue rows are deleted only on a positive
//! acknowledgement, so a crash between delivery and ack re-presents the
//! envelope on restart.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    DeadLetter, DigitalIdentity, EmergencyAlert, EnvelopeId, EnvelopePayload, IdentityId,
    SyncEnvelope, TouristId, VerificationStatus, ZoneStatus,
};
use crate::infra::error::{EngineError, Result};

/// Default bound on queued envelopes before enqueue refuses new work.
pub const DEFAULT_MAX_QUEUE_DEPTH: u64 = 10_000;

const LAST_ALERT_KEY: &str = "last_alert";
const LAST_ZONE_KEY: &str = "last_zone";

/// A queued envelope together with its local queue position and the
/// number of explicit rejections it has accumulated.
#[derive(Debug, Clone)]
pub struct QueuedEnvelope {
    pub local_id: i64,
    pub reject_count: u32,
    pub envelope: SyncEnvelope,
}

/// Handle over the device-local SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_queue_depth: u64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
        }
    }

    pub fn with_max_queue_depth(mut self, max_queue_depth: u64) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Open (creating if missing) a database file at `path`.
    pub async fn from_path(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self::new(pool))
    }

    /// Open an in-memory database on a single pooled connection, so all
    /// callers observe the same data.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(":memory:")
            .await?;
        Ok(Self::new(pool))
    }

    /// Run embedded migrations. Must be called before first use.
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool)
            .await
            .map_err(|e| EngineError::Internal(format!("sqlite migration failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Sync queue =====

    /// Append an envelope to the tail of the sync queue.
    ///
    /// Fails with [`EngineError::QueueFull`] when the bound is reached;
    /// callers treat that as fatal rather than dropping older entries.
    pub async fn enqueue(&self, envelope: &SyncEnvelope) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let local_id = insert_envelope(&mut tx, envelope, self.max_queue_depth).await?;
        tx.commit().await?;
        Ok(local_id)
    }

    /// Atomically append the transition envelope (when one is owed) and
    /// persist the updated alert snapshot. Either both land or neither.
    pub async fn commit_alert_transition(
        &self,
        envelope: Option<&SyncEnvelope>,
        alert: &EmergencyAlert,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(envelope) = envelope {
            insert_envelope(&mut tx, envelope, self.max_queue_depth).await?;
        }
        let value = serde_json::to_string(alert)?;
        upsert_state(&mut tx, LAST_ALERT_KEY, &value).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Read up to `limit` envelopes from the head of the queue without
    /// removing them. Order is strictly insertion order.
    pub async fn peek_batch(&self, limit: u32) -> Result<Vec<QueuedEnvelope>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            "SELECT id, envelope_id, payload, created_at, attempt_count, reject_count \
             FROM sync_queue ORDER BY id ASC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueuedEnvelope::try_from).collect()
    }

    /// Remove an envelope after the remote authority settled it.
    ///
    /// Idempotent: acknowledging an already-removed envelope returns
    /// `false` and changes nothing.
    pub async fn acknowledge(&self, envelope_id: &EnvelopeId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE envelope_id = ?")
            .bind(envelope_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bump the delivery attempt counter, returning the new total.
    pub async fn record_attempt(&self, envelope_id: &EnvelopeId) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE sync_queue SET attempt_count = attempt_count + 1 WHERE envelope_id = ?",
        )
        .bind(envelope_id.to_string())
        .execute(&mut *tx)
        .await?;
        let count: Option<(i64,)> =
            sqlx::query_as("SELECT attempt_count FROM sync_queue WHERE envelope_id = ?")
                .bind(envelope_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(count.map(|(n,)| n as u32).unwrap_or(0))
    }

    /// Bump the rejection counter, returning the new total.
    pub async fn record_rejection(&self, envelope_id: &EnvelopeId) -> Result<u32> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE sync_queue SET reject_count = reject_count + 1 WHERE envelope_id = ?")
            .bind(envelope_id.to_string())
            .execute(&mut *tx)
            .await?;
        let count: Option<(i64,)> =
            sqlx::query_as("SELECT reject_count FROM sync_queue WHERE envelope_id = ?")
                .bind(envelope_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(count.map(|(n,)| n as u32).unwrap_or(0))
    }

    /// Move an envelope from the queue into the dead-letter table in one
    /// transaction, so the queue head can advance past it.
    pub async fn dead_letter(&self, envelope_id: &EnvelopeId, reason: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT id, envelope_id, payload, created_at, attempt_count, reject_count \
             FROM sync_queue WHERE envelope_id = ?",
        )
        .bind(envelope_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(EngineError::Internal(format!(
                "cannot dead-letter unknown envelope {}",
                envelope_id
            )));
        };
        let payload_json = row.payload.clone();
        let queued = QueuedEnvelope::try_from(row)?;

        sqlx::query(
            "INSERT INTO dead_letters \
             (envelope_id, payload_kind, payload, created_at, attempt_count, reason, failed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(queued.envelope.envelope_id.to_string())
        .bind(queued.envelope.payload_kind().as_str())
        .bind(payload_json)
        .bind(queued.envelope.created_at.to_rfc3339())
        .bind(queued.envelope.attempt_count as i64)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM sync_queue WHERE envelope_id = ?")
            .bind(envelope_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT envelope_id, payload, created_at, attempt_count, reason, failed_at \
             FROM dead_letters ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    pub async fn queue_depth(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn dead_letter_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    // ===== Device state snapshots =====

    pub async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_state(&mut tx, key, value).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM device_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn save_alert_snapshot(&self, alert: &EmergencyAlert) -> Result<()> {
        let value = serde_json::to_string(alert)?;
        self.set_state(LAST_ALERT_KEY, &value).await
    }

    pub async fn load_alert_snapshot(&self) -> Result<Option<EmergencyAlert>> {
        match self.get_state(LAST_ALERT_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    pub async fn save_zone_status(&self, status: &ZoneStatus) -> Result<()> {
        let value = serde_json::to_string(status)?;
        self.set_state(LAST_ZONE_KEY, &value).await
    }

    pub async fn load_zone_status(&self) -> Result<Option<ZoneStatus>> {
        match self.get_state(LAST_ZONE_KEY).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    // ===== Identities =====

    /// Insert a new identity record, superseding any live record for the
    /// same tourist in the same transaction. History is never deleted.
    pub async fn insert_identity(&self, identity: &DigitalIdentity) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE identities SET superseded = 1 WHERE tourist_id = ? AND superseded = 0")
            .bind(identity.tourist_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO identities (identity_id, tourist_id, verification_status, registered_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(identity.identity_id.as_str())
        .bind(identity.tourist_id.to_string())
        .bind(identity.verification_status.as_str())
        .bind(identity.registered_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn identity(&self, identity_id: &IdentityId) -> Result<Option<DigitalIdentity>> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT identity_id, tourist_id, verification_status, registered_at \
             FROM identities WHERE identity_id = ?",
        )
        .bind(identity_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(DigitalIdentity::try_from).transpose()
    }

    /// The live (non-superseded) identity for a tourist, if any.
    pub async fn current_identity(&self, tourist_id: &TouristId) -> Result<Option<DigitalIdentity>> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT identity_id, tourist_id, verification_status, registered_at \
             FROM identities WHERE tourist_id = ? AND superseded = 0 \
             ORDER BY rowid DESC LIMIT 1",
        )
        .bind(tourist_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(DigitalIdentity::try_from).transpose()
    }

    /// Every identity ever registered for a tourist, oldest first.
    pub async fn identity_history(&self, tourist_id: &TouristId) -> Result<Vec<DigitalIdentity>> {
        let rows: Vec<IdentityRow> = sqlx::query_as(
            "SELECT identity_id, tourist_id, verification_status, registered_at \
             FROM identities WHERE tourist_id = ? ORDER BY rowid ASC",
        )
        .bind(tourist_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DigitalIdentity::try_from).collect()
    }

    /// Returns `false` when no record matches `identity_id`.
    pub async fn update_identity_status(
        &self,
        identity_id: &IdentityId,
        status: VerificationStatus,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE identities SET verification_status = ? WHERE identity_id = ?")
                .bind(status.as_str())
                .bind(identity_id.as_str())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn insert_envelope(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    envelope: &SyncEnvelope,
    max_queue_depth: u64,
) -> Result<i64> {
    let (depth,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_queue")
        .fetch_one(&mut **tx)
        .await?;
    if depth as u64 >= max_queue_depth {
        return Err(EngineError::QueueFull {
            depth: depth as u64,
        });
    }

    let payload = serde_json::to_string(&envelope.payload)?;
    let result = sqlx::query(
        "INSERT INTO sync_queue (envelope_id, payload_kind, payload, created_at, attempt_count) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(envelope.envelope_id.to_string())
    .bind(envelope.payload_kind().as_str())
    .bind(payload)
    .bind(envelope.created_at.to_rfc3339())
    .bind(envelope.attempt_count as i64)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

async fn upsert_state(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    key: &str,
    value: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO device_state (key, value, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[derive(FromRow)]
struct QueueRow {
    id: i64,
    envelope_id: String,
    payload: String,
    created_at: String,
    attempt_count: i64,
    reject_count: i64,
}

impl TryFrom<QueueRow> for QueuedEnvelope {
    type Error = EngineError;

    fn try_from(row: QueueRow) -> Result<Self> {
        let envelope_id = Uuid::parse_str(&row.envelope_id)
            .map_err(|e| EngineError::Internal(format!("invalid envelope id in queue: {}", e)))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| EngineError::Internal(format!("invalid timestamp in queue: {}", e)))?
            .with_timezone(&Utc);
        let payload: EnvelopePayload = serde_json::from_str(&row.payload)?;

        Ok(QueuedEnvelope {
            local_id: row.id,
            reject_count: row.reject_count as u32,
            envelope: SyncEnvelope {
                envelope_id: EnvelopeId::from_uuid(envelope_id),
                created_at,
                payload,
                attempt_count: row.attempt_count as u32,
            },
        })
    }
}

#[derive(FromRow)]
struct DeadLetterRow {
    envelope_id: String,
    payload: String,
    created_at: String,
    attempt_count: i64,
    reason: String,
    failed_at: String,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = EngineError;

    fn try_from(row: DeadLetterRow) -> Result<Self> {
        let envelope_id = Uuid::parse_str(&row.envelope_id).map_err(|e| {
            EngineError::Internal(format!("invalid envelope id in dead letters: {}", e))
        })?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| EngineError::Internal(format!("invalid timestamp in dead letters: {}", e)))?
            .with_timezone(&Utc);
        let failed_at = DateTime::parse_from_rfc3339(&row.failed_at)
            .map_err(|e| EngineError::Internal(format!("invalid timestamp in dead letters: {}", e)))?
            .with_timezone(&Utc);
        let payload: EnvelopePayload = serde_json::from_str(&row.payload)?;

        Ok(DeadLetter {
            envelope: SyncEnvelope {
                envelope_id: EnvelopeId::from_uuid(envelope_id),
                created_at,
                payload,
                attempt_count: row.attempt_count as u32,
            },
            reason: row.reason,
            failed_at,
        })
    }
}

#[derive(FromRow)]
struct IdentityRow {
    identity_id: String,
    tourist_id: String,
    verification_status: String,
    registered_at: String,
}

impl TryFrom<IdentityRow> for DigitalIdentity {
    type Error = EngineError;

    fn try_from(row: IdentityRow) -> Result<Self> {
        let tourist_id = Uuid::parse_str(&row.tourist_id)
            .map_err(|e| EngineError::Internal(format!("invalid tourist id in identities: {}", e)))?;
        let verification_status = VerificationStatus::from_str_opt(&row.verification_status)
            .ok_or_else(|| {
                EngineError::Internal(format!(
                    "unknown verification status in identities: {}",
                    row.verification_status
                ))
            })?;
        let registered_at = DateTime::parse_from_rfc3339(&row.registered_at)
            .map_err(|e| EngineError::Internal(format!("invalid timestamp in identities: {}", e)))?
            .with_timezone(&Utc);

        Ok(DigitalIdentity {
            identity_id: IdentityId::new(row.identity_id),
            tourist_id: TouristId::from_uuid(tourist_id),
            verification_status,
            registered_at,
        })
    }
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AlertStatus, AlertTransition, DeviceId, DeviceTelemetrySample, GeoPoint, RiskLevel,
        TelemetryReading,
    };

    async fn create_test_store() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store.initialize().await.unwrap();
        store
    }

    fn telemetry_envelope(device: &str) -> SyncEnvelope {
        let reading = TelemetryReading::new(GeoPoint::new(27.1751, 78.0421), 80, 70);
        let sample = DeviceTelemetrySample::capture(DeviceId::new(device), reading);
        SyncEnvelope::telemetry(sample)
    }

    #[tokio::test]
    async fn enqueue_and_peek_preserve_insertion_order() {
        let store = create_test_store().await;

        let first = telemetry_envelope("band-1");
        let second = telemetry_envelope("band-2");
        let third = telemetry_envelope("band-3");
        store.enqueue(&first).await.unwrap();
        store.enqueue(&second).await.unwrap();
        store.enqueue(&third).await.unwrap();

        let batch = store.peek_batch(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].envelope.envelope_id, first.envelope_id);
        assert_eq!(batch[1].envelope.envelope_id, second.envelope_id);
        assert!(batch[0].local_id < batch[1].local_id);
        assert_eq!(store.queue_depth().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn acknowledge_removes_envelope_and_is_idempotent() {
        let store = create_test_store().await;
        let envelope = telemetry_envelope("band-1");
        store.enqueue(&envelope).await.unwrap();

        assert!(store.acknowledge(&envelope.envelope_id).await.unwrap());
        assert_eq!(store.queue_depth().await.unwrap(), 0);
        // Second acknowledgement is a no-op, not an error.
        assert!(!store.acknowledge(&envelope.envelope_id).await.unwrap());
    }

    #[tokio::test]
    async fn enqueue_fails_when_queue_is_full() {
        let store = create_test_store().await.with_max_queue_depth(2);
        store.enqueue(&telemetry_envelope("band-1")).await.unwrap();
        store.enqueue(&telemetry_envelope("band-2")).await.unwrap();

        let err = store
            .enqueue(&telemetry_envelope("band-3"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::QueueFull { depth: 2 }));
        assert_eq!(store.queue_depth().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn attempt_and_rejection_counters_increment_independently() {
        let store = create_test_store().await;
        let envelope = telemetry_envelope("band-1");
        store.enqueue(&envelope).await.unwrap();

        assert_eq!(store.record_attempt(&envelope.envelope_id).await.unwrap(), 1);
        assert_eq!(store.record_attempt(&envelope.envelope_id).await.unwrap(), 2);
        assert_eq!(
            store.record_rejection(&envelope.envelope_id).await.unwrap(),
            1
        );

        let batch = store.peek_batch(1).await.unwrap();
        assert_eq!(batch[0].envelope.attempt_count, 2);
        assert_eq!(batch[0].reject_count, 1);
    }

    #[tokio::test]
    async fn dead_letter_moves_envelope_out_of_the_queue() {
        let store = create_test_store().await;
        let doomed = telemetry_envelope("band-1");
        let survivor = telemetry_envelope("band-2");
        store.enqueue(&doomed).await.unwrap();
        store.enqueue(&survivor).await.unwrap();
        store.record_attempt(&doomed.envelope_id).await.unwrap();

        store
            .dead_letter(&doomed.envelope_id, "schema mismatch")
            .await
            .unwrap();

        let batch = store.peek_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].envelope.envelope_id, survivor.envelope_id);

        let parked = store.dead_letters().await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].envelope.envelope_id, doomed.envelope_id);
        assert_eq!(parked[0].envelope.attempt_count, 1);
        assert_eq!(parked[0].reason, "schema mismatch");
        assert_eq!(store.dead_letter_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dead_letter_of_unknown_envelope_is_an_error() {
        let store = create_test_store().await;
        let err = store
            .dead_letter(&EnvelopeId::new(), "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[tokio::test]
    async fn alert_snapshot_round_trips_and_overwrites() {
        let store = create_test_store().await;
        assert!(store.load_alert_snapshot().await.unwrap().is_none());

        let mut alert = EmergencyAlert::pending(TouristId::new(), Utc::now());
        store.save_alert_snapshot(&alert).await.unwrap();
        alert.transition(AlertStatus::Active, Utc::now()).unwrap();
        store.save_alert_snapshot(&alert).await.unwrap();

        let loaded = store.load_alert_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.alert_id, alert.alert_id);
        assert_eq!(loaded.status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn commit_alert_transition_persists_envelope_and_snapshot_together() {
        let store = create_test_store().await;
        let mut alert = EmergencyAlert::pending(TouristId::new(), Utc::now());
        alert.transition(AlertStatus::Active, Utc::now()).unwrap();
        let transition = AlertTransition {
            alert_id: alert.alert_id,
            tourist_id: alert.tourist_id,
            from: AlertStatus::Pending,
            to: AlertStatus::Active,
            coordinates: None,
            occurred_at: alert.last_transition_at,
        };
        let envelope = SyncEnvelope::alert_transition(transition);

        store
            .commit_alert_transition(Some(&envelope), &alert)
            .await
            .unwrap();

        assert_eq!(store.queue_depth().await.unwrap(), 1);
        let loaded = store.load_alert_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn zone_status_round_trips() {
        let store = create_test_store().await;
        assert!(store.load_zone_status().await.unwrap().is_none());

        let status = ZoneStatus::new("riverbank", RiskLevel::Caution, Utc::now());
        store.save_zone_status(&status).await.unwrap();

        let loaded = store.load_zone_status().await.unwrap().unwrap();
        assert_eq!(loaded.zone_label, "riverbank");
        assert_eq!(loaded.risk_level, RiskLevel::Caution);
    }

    #[tokio::test]
    async fn reregistration_supersedes_but_keeps_history() {
        let store = create_test_store().await;
        let tourist = TouristId::new();

        let first = DigitalIdentity::pending(IdentityId::new("ID-001"), tourist);
        store.insert_identity(&first).await.unwrap();
        store
            .update_identity_status(&first.identity_id, VerificationStatus::Verified)
            .await
            .unwrap();

        let second = DigitalIdentity::pending(IdentityId::new("ID-002"), tourist);
        store.insert_identity(&second).await.unwrap();

        let current = store.current_identity(&tourist).await.unwrap().unwrap();
        assert_eq!(current.identity_id, second.identity_id);
        assert_eq!(current.verification_status, VerificationStatus::Pending);

        let history = store.identity_history(&tourist).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].identity_id, first.identity_id);
        assert_eq!(history[0].verification_status, VerificationStatus::Verified);
    }

    #[tokio::test]
    async fn update_status_of_unknown_identity_returns_false() {
        let store = create_test_store().await;
        let updated = store
            .update_identity_status(&IdentityId::new("missing"), VerificationStatus::Verified)
            .await
            .unwrap();
        assert!(!updated);
    }
}
