//! Charging pile domain entity

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Charging mode. Fast and slow piles form two fully partitioned pools,
/// each with its own waiting queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChargeType {
    Fast,
    Slow,
}

impl ChargeType {
    /// One-letter prefix used in queue numbers ("F7", "S3").
    pub fn prefix(&self) -> char {
        match self {
            Self::Fast => 'F',
            Self::Slow => 'S',
        }
    }
}

impl std::fmt::Display for ChargeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "FAST"),
            Self::Slow => write!(f, "SLOW"),
        }
    }
}

/// Operational status of a pile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PileStatus {
    Available,
    Busy,
    Offline,
    Faulted,
}

impl std::fmt::Display for PileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "AVAILABLE"),
            Self::Busy => write!(f, "BUSY"),
            Self::Offline => write!(f, "OFFLINE"),
            Self::Faulted => write!(f, "FAULTED"),
        }
    }
}

/// A physical charging pile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pile {
    pub id: i64,
    /// Human-readable pile code, e.g. "F-01"
    pub code: String,
    pub charge_type: ChargeType,
    /// Delivery rate in kWh per hour; always positive
    pub power_rate: Decimal,
    pub status: PileStatus,
    /// Request currently charging on this pile, if any
    pub bound_request_id: Option<i64>,
}

impl Pile {
    pub fn new(id: i64, code: impl Into<String>, charge_type: ChargeType, power_rate: Decimal) -> Self {
        Self {
            id,
            code: code.into(),
            charge_type,
            power_rate,
            status: PileStatus::Available,
            bound_request_id: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == PileStatus::Available
    }
}
