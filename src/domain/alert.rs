//! Emergency alert records and their lifecycle
//!
//! The alert record moves through
//! `Pending -> Active -> Responding -> Resolved`, with `Cancelled` reachable
//! only from `Pending` (before the arming countdown expires). The state
//! machine in [`crate::alert`] owns the record until it is synced; afterwards
//! the local copy is a cached replica used to block duplicate re-raises.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{AlertId, GeoPoint, TouristId};

/// Lifecycle status of an emergency alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Raised, arming countdown still running; local only
    Pending,
    /// Committed and synced; help has been requested
    Active,
    /// An operator acknowledged the alert and is responding
    Responding,
    /// Closed by the tourist or an operator
    Resolved,
    /// Discarded during the countdown; local only, never synced
    Cancelled,
}

impl AlertStatus {
    /// Terminal statuses no longer block a new raise.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Cancelled)
    }

    /// Legal status moves. Anything not listed is an invalid transition.
    pub fn can_transition_to(&self, to: AlertStatus) -> bool {
        matches!(
            (self, to),
            (AlertStatus::Pending, AlertStatus::Active)
                | (AlertStatus::Pending, AlertStatus::Cancelled)
                | (AlertStatus::Active, AlertStatus::Responding)
                | (AlertStatus::Active, AlertStatus::Resolved)
                | (AlertStatus::Responding, AlertStatus::Resolved)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Active => "active",
            AlertStatus::Responding => "responding",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AlertStatus::Pending),
            "active" => Some(AlertStatus::Active),
            "responding" => Some(AlertStatus::Responding),
            "resolved" => Some(AlertStatus::Resolved),
            "cancelled" => Some(AlertStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One emergency alert raised by a tourist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    /// Alert identifier
    pub alert_id: AlertId,

    /// Tourist who raised it
    pub tourist_id: TouristId,

    /// When the raise was requested (start of the countdown)
    pub raised_at: DateTime<Utc>,

    /// Position captured at activation; absent when no fix was available
    /// within the bounded timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GeoPoint>,

    /// Current lifecycle status
    pub status: AlertStatus,

    /// When the status last changed
    pub last_transition_at: DateTime<Utc>,
}

impl EmergencyAlert {
    /// Fresh alert in `Pending`, countdown running.
    pub fn pending(tourist_id: TouristId, raised_at: DateTime<Utc>) -> Self {
        Self {
            alert_id: AlertId::new(),
            tourist_id,
            raised_at,
            coordinates: None,
            status: AlertStatus::Pending,
            last_transition_at: raised_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status move, rejecting illegal ones.
    pub fn transition(&mut self, to: AlertStatus, at: DateTime<Utc>) -> Result<(), String> {
        if !self.status.can_transition_to(to) {
            return Err(format!("illegal alert transition {} -> {}", self.status, to));
        }
        self.status = to;
        self.last_transition_at = at;
        Ok(())
    }
}

/// The sync payload describing one committed alert status move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTransition {
    /// Alert this transition belongs to
    pub alert_id: AlertId,

    /// Tourist who owns the alert
    pub tourist_id: TouristId,

    /// Status before the move
    pub from: AlertStatus,

    /// Status after the move
    pub to: AlertStatus,

    /// Position at transition time, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GeoPoint>,

    /// When the transition was committed locally
    pub occurred_at: DateTime<Utc>,
}

/// A lifecycle update pushed down by the remote authority
/// (operator acknowledgment or operator-side resolution)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertUpdate {
    /// Alert the update refers to
    pub alert_id: AlertId,

    /// New status assigned by the authority
    pub status: AlertStatus,

    /// When the authority recorded the change
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(AlertStatus::Pending.can_transition_to(AlertStatus::Active));
        assert!(AlertStatus::Pending.can_transition_to(AlertStatus::Cancelled));
        assert!(AlertStatus::Active.can_transition_to(AlertStatus::Responding));
        assert!(AlertStatus::Active.can_transition_to(AlertStatus::Resolved));
        assert!(AlertStatus::Responding.can_transition_to(AlertStatus::Resolved));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!AlertStatus::Pending.can_transition_to(AlertStatus::Responding));
        assert!(!AlertStatus::Active.can_transition_to(AlertStatus::Cancelled));
        assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Active));
        assert!(!AlertStatus::Cancelled.can_transition_to(AlertStatus::Pending));
        assert!(!AlertStatus::Responding.can_transition_to(AlertStatus::Responding));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AlertStatus::Resolved.is_terminal());
        assert!(AlertStatus::Cancelled.is_terminal());
        assert!(!AlertStatus::Pending.is_terminal());
        assert!(!AlertStatus::Active.is_terminal());
        assert!(!AlertStatus::Responding.is_terminal());
    }

    #[test]
    fn test_record_transition_updates_timestamps() {
        let raised = Utc::now();
        let mut alert = EmergencyAlert::pending(TouristId::new(), raised);
        assert_eq!(alert.status, AlertStatus::Pending);
        assert_eq!(alert.last_transition_at, raised);

        let later = raised + chrono::Duration::seconds(3);
        alert.transition(AlertStatus::Active, later).unwrap();
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.last_transition_at, later);
        assert_eq!(alert.raised_at, raised);
    }

    #[test]
    fn test_record_rejects_illegal_transition() {
        let mut alert = EmergencyAlert::pending(TouristId::new(), Utc::now());
        let err = alert
            .transition(AlertStatus::Responding, Utc::now())
            .unwrap_err();
        assert!(err.contains("pending -> responding"));
        assert_eq!(alert.status, AlertStatus::Pending);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            AlertStatus::Pending,
            AlertStatus::Active,
            AlertStatus::Responding,
            AlertStatus::Resolved,
            AlertStatus::Cancelled,
        ] {
            assert_eq!(AlertStatus::from_str_opt(status.as_str()), Some(status));
        }
    }
}
