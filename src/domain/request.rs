//! Charging request domain entity

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::pile::ChargeType;

/// Request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    /// Waiting for a compatible pile
    Queued,
    /// Bound to a pile and charging
    Charging,
    /// Requested amount fully delivered
    Completed,
    /// Stopped early (by the user, an admin, or a pile fault)
    Stopped,
    /// Cancelled while still queued; no order is produced
    Cancelled,
}

impl RequestStatus {
    /// Terminal requests are immutable apart from the order they spawn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Cancelled)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Charging => write!(f, "CHARGING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// A charging request submitted by a user.
///
/// At most one request per user is non-terminal at any time; the
/// lifecycle manager enforces this on submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub id: i64,
    pub user_id: i64,
    /// Sequential queue number, e.g. "F7" or "S3". Reassigned when an
    /// update moves the request to the other charge-type queue.
    pub queue_number: String,
    pub charge_type: ChargeType,
    /// Requested energy in kWh; always positive
    pub requested_amount: Decimal,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    /// When the request entered its current waiting queue
    pub queued_since: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Pile the request is (or was) charging on
    pub pile_id: Option<i64>,
}

impl ChargeRequest {
    pub fn new(
        id: i64,
        user_id: i64,
        queue_number: impl Into<String>,
        charge_type: ChargeType,
        requested_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            queue_number: queue_number.into(),
            charge_type,
            requested_amount,
            status: RequestStatus::Queued,
            created_at: now,
            queued_since: now,
            started_at: None,
            ended_at: None,
            pile_id: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
