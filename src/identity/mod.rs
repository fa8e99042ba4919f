//! Digital identity registration and verification.
//!
//! Issuance is delegated to an opaque external collaborator under a
//! bounded wait; the local record starts Pending and moves between
//! verification states through operator actions. Records are never
//! deleted: re-registration supersedes the previous record and the
//! full history stays queryable.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::domain::{DigitalIdentity, IdentityId, TouristId, TravelerForm, VerificationStatus};
use crate::infra::{EngineError, IdentityIssuer, Result, SqliteStore};

/// Identity registry configuration.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Upper bound on one issuer invocation.
    pub issue_timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            issue_timeout: Duration::from_secs(10),
        }
    }
}

/// Local registry of externally issued digital identities.
#[derive(Clone)]
pub struct IdentityRegistry {
    config: IdentityConfig,
    store: SqliteStore,
    issuer: Arc<dyn IdentityIssuer>,
}

impl IdentityRegistry {
    pub fn new(config: IdentityConfig, store: SqliteStore, issuer: Arc<dyn IdentityIssuer>) -> Self {
        Self {
            config,
            store,
            issuer,
        }
    }

    /// Validate the form, obtain an identifier from the issuer, and
    /// store the new record as Pending. Any active record for the same
    /// tourist is superseded in the same transaction.
    #[instrument(skip(self, form), fields(tourist_id = %tourist_id))]
    pub async fn register(
        &self,
        tourist_id: TouristId,
        form: &TravelerForm,
    ) -> Result<DigitalIdentity> {
        form.validate().map_err(EngineError::Validation)?;

        let timeout = self.config.issue_timeout;
        let identity_id =
            match tokio::time::timeout(timeout, self.issuer.issue(&tourist_id)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        tourist_id = %tourist_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "identity issuer timed out"
                    );
                    return Err(EngineError::IdentityIssuance(format!(
                        "issuer did not answer within {} ms",
                        timeout.as_millis()
                    )));
                }
            };

        let identity = DigitalIdentity::pending(identity_id, tourist_id);
        self.store.insert_identity(&identity).await?;
        info!(
            identity_id = %identity.identity_id,
            tourist_id = %tourist_id,
            "identity registered"
        );
        Ok(identity)
    }

    /// Mark a record Verified. Idempotent when already Verified; a
    /// Flagged record is refused and needs [`verify_override`].
    ///
    /// [`verify_override`]: IdentityRegistry::verify_override
    pub async fn verify(&self, identity_id: &IdentityId) -> Result<DigitalIdentity> {
        self.transition(identity_id, VerificationStatus::Verified, false)
            .await
    }

    /// Mark a record Flagged. Idempotent when already Flagged.
    pub async fn flag(&self, identity_id: &IdentityId) -> Result<DigitalIdentity> {
        self.transition(identity_id, VerificationStatus::Flagged, false)
            .await
    }

    /// Clear a Flagged record to Verified. This is the only path out of
    /// Flagged.
    pub async fn verify_override(&self, identity_id: &IdentityId) -> Result<DigitalIdentity> {
        self.transition(identity_id, VerificationStatus::Verified, true)
            .await
    }

    pub async fn identity(&self, identity_id: &IdentityId) -> Result<Option<DigitalIdentity>> {
        self.store.identity(identity_id).await
    }

    /// The active (non-superseded) record for a tourist, if any.
    pub async fn current(&self, tourist_id: &TouristId) -> Result<Option<DigitalIdentity>> {
        self.store.current_identity(tourist_id).await
    }

    /// Every record ever registered for a tourist, oldest first.
    pub async fn history(&self, tourist_id: &TouristId) -> Result<Vec<DigitalIdentity>> {
        self.store.identity_history(tourist_id).await
    }

    #[instrument(skip(self), fields(identity_id = %identity_id, to = %to))]
    async fn transition(
        &self,
        identity_id: &IdentityId,
        to: VerificationStatus,
        with_override: bool,
    ) -> Result<DigitalIdentity> {
        let Some(mut identity) = self.store.identity(identity_id).await? else {
            return Err(EngineError::IdentityNotFound(
                identity_id.as_str().to_string(),
            ));
        };

        if identity.verification_status == to {
            return Ok(identity);
        }
        if to == VerificationStatus::Verified
            && identity.verification_status == VerificationStatus::Flagged
            && !with_override
        {
            return Err(EngineError::IdentityFlagged(
                identity_id.as_str().to_string(),
            ));
        }

        if !self.store.update_identity_status(identity_id, to).await? {
            return Err(EngineError::IdentityNotFound(
                identity_id.as_str().to_string(),
            ));
        }
        identity.verification_status = to;
        info!(identity_id = %identity_id, status = %to, "identity status updated");
        Ok(identity)
    }
}

// ===== Tests =====
