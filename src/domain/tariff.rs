//! Time-of-use tariff table
//!
//! Tariff policy is configuration data passed into the billing engine,
//! not hard-coded there. The default table mirrors a common three-band
//! peak/standard/off-peak day.

use chrono::Timelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One time-of-use band, in whole hours of the UTC day.
/// `start_hour` is inclusive, `end_hour` exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffPeriod {
    pub start_hour: u32,
    pub end_hour: u32,
    /// Price per kWh within this band
    pub rate: Decimal,
}

impl TariffPeriod {
    pub fn new(start_hour: u32, end_hour: u32, rate: Decimal) -> Self {
        Self {
            start_hour,
            end_hour,
            rate,
        }
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

/// Tariff table for a station: time-of-use bands plus a flat per-kWh
/// service fee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TariffTable {
    pub periods: Vec<TariffPeriod>,
    pub service_fee_per_kwh: Decimal,
    /// Fallback when no band covers an hour (a well-formed table covers
    /// all 24)
    pub default_rate: Decimal,
}

impl TariffTable {
    /// Electricity rate in effect at `timestamp`.
    pub fn rate_at(&self, timestamp: chrono::DateTime<chrono::Utc>) -> Decimal {
        let hour = timestamp.hour();
        self.periods
            .iter()
            .find(|p| p.contains_hour(hour))
            .map(|p| p.rate)
            .unwrap_or(self.default_rate)
    }
}

impl Default for TariffTable {
    fn default() -> Self {
        let peak = Decimal::new(10, 1); // 1.0
        let standard = Decimal::new(7, 1); // 0.7
        let off_peak = Decimal::new(4, 1); // 0.4
        Self {
            periods: vec![
                // Peak: 10:00-15:00, 18:00-21:00
                TariffPeriod::new(10, 15, peak),
                TariffPeriod::new(18, 21, peak),
                // Standard: 07:00-10:00, 15:00-18:00, 21:00-23:00
                TariffPeriod::new(7, 10, standard),
                TariffPeriod::new(15, 18, standard),
                TariffPeriod::new(21, 23, standard),
                // Off-peak: 23:00-24:00, 00:00-07:00
                TariffPeriod::new(23, 24, off_peak),
                TariffPeriod::new(0, 7, off_peak),
            ],
            service_fee_per_kwh: Decimal::new(8, 1), // 0.8
            default_rate: standard,
        }
    }
}
