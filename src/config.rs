//! Station configuration
//!
//! Loaded from a TOML file; every field has a sensible default so the core
//! can run with no file at all.

use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::TariffTable;

/// Configuration for the admission-control core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Maximum number of requests across both waiting queues;
    /// `None` means unbounded.
    pub waiting_area_capacity: Option<usize>,
    /// How often the charging monitor checks for naturally completed
    /// sessions, in seconds.
    pub metering_interval_secs: u64,
    /// A force-stopped request is re-queued for its undelivered remainder
    /// only when the remainder is at least this many kWh.
    pub min_requeue_amount: Decimal,
    pub tariffs: TariffTable,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            waiting_area_capacity: Some(6),
            metering_interval_secs: 5,
            min_requeue_amount: Decimal::new(1, 1), // 0.1 kWh
            tariffs: TariffTable::default(),
        }
    }
}

impl StationConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&raw)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = StationConfig::default();
        assert_eq!(cfg.waiting_area_capacity, Some(6));
        assert_eq!(cfg.metering_interval_secs, 5);
        assert!(!cfg.tariffs.periods.is_empty());
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: StationConfig = toml::from_str(
            r#"
            metering_interval_secs = 1
            waiting_area_capacity = 10
            "#,
        )
        .unwrap();
        assert_eq!(cfg.metering_interval_secs, 1);
        assert_eq!(cfg.waiting_area_capacity, Some(10));
        // untouched fields keep their defaults
        assert_eq!(cfg.min_requeue_amount, Decimal::new(1, 1));
    }
}
