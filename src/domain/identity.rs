//! Digital identity records and the traveler registration form
//!
//! Identity issuance itself is an opaque external concern; this module only
//! models the local record and the form validation that gates registration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{IdentityId, TouristId};

/// Verification state of a digital identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Registered, awaiting operator review
    Pending,
    /// Cleared by an operator
    Verified,
    /// Marked suspicious; only an explicit override clears it
    Flagged,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Flagged => "flagged",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationStatus::Pending),
            "verified" => Some(VerificationStatus::Verified),
            "flagged" => Some(VerificationStatus::Flagged),
            _ => None,
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The local record of an externally issued digital identity.
/// Records are never deleted; re-registration supersedes the older record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalIdentity {
    /// Identifier issued by the external identity collaborator
    pub identity_id: IdentityId,

    /// Tourist the identity belongs to
    pub tourist_id: TouristId,

    /// Current verification state
    pub verification_status: VerificationStatus,

    /// When the identity was registered locally
    pub registered_at: DateTime<Utc>,
}

impl DigitalIdentity {
    pub fn pending(identity_id: IdentityId, tourist_id: TouristId) -> Self {
        Self {
            identity_id,
            tourist_id,
            verification_status: VerificationStatus::Pending,
            registered_at: Utc::now(),
        }
    }
}

/// Traveler registration form.
///
/// Field rules follow the issuing authority's intake requirements; a failed
/// rule rejects the registration locally and nothing is stored or sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelerForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub nationality: String,
    pub passport_number: String,
    pub emergency_contact_name: String,
    pub emergency_contact_phone: String,
    pub destination: String,
    pub trip_purpose: String,
}

impl TravelerForm {
    /// First failing rule, as "field: problem".
    pub fn validate(&self) -> Result<(), String> {
        if self.first_name.trim().len() < 2 {
            return Err("first_name: must be at least 2 characters".into());
        }
        if self.last_name.trim().len() < 2 {
            return Err("last_name: must be at least 2 characters".into());
        }
        if !plausible_email(&self.email) {
            return Err("email: not a valid address".into());
        }
        if digit_count(&self.phone) < 10 {
            return Err("phone: must contain at least 10 digits".into());
        }
        if self.nationality.trim().is_empty() {
            return Err("nationality: must not be empty".into());
        }
        if self.passport_number.trim().len() < 6 {
            return Err("passport_number: must be at least 6 characters".into());
        }
        if self.emergency_contact_name.trim().len() < 2 {
            return Err("emergency_contact_name: must be at least 2 characters".into());
        }
        if digit_count(&self.emergency_contact_phone) < 10 {
            return Err("emergency_contact_phone: must contain at least 10 digits".into());
        }
        if self.destination.trim().len() < 2 {
            return Err("destination: must be at least 2 characters".into());
        }
        if self.trip_purpose.trim().len() < 10 {
            return Err("trip_purpose: must be at least 10 characters".into());
        }
        Ok(())
    }
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}

fn plausible_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.contains(char::is_whitespace)
}
