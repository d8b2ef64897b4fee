//! Charging order domain entity

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable billing record produced exactly once when a request reaches
/// a Completed or Stopped outcome. Never produced for cancellations and
/// never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub request_id: i64,
    pub user_id: i64,
    pub pile_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Energy actually delivered in kWh; at most the requested amount
    pub delivered_amount: Decimal,
    pub duration_seconds: i64,
    /// Electricity cost across time-of-use periods
    pub charge_fee: Decimal,
    /// Flat per-kWh station service cost
    pub service_fee: Decimal,
    pub total_fee: Decimal,
    /// Derived from `ended_at` so that replaying the computation yields an
    /// identical record.
    pub created_at: DateTime<Utc>,
}
