//! Charging station core demo binary.
//!
//! Assembles the core over the in-memory store, seeds a small pile layout
//! and walks two users through the request lifecycle. Reads configuration
//! from the TOML file named by `STATION_CONFIG`, falling back to defaults.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use rust_decimal::Decimal;

use charging_core::domain::{ChargeType, UserRole};
use charging_core::{InMemoryStore, Station, StationConfig, Storage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::var("STATION_CONFIG") {
        Ok(path) => match StationConfig::load(&path) {
            Ok(cfg) => {
                info!("Configuration loaded from {}", path);
                cfg
            }
            Err(e) => {
                error!("Failed to load config from {}: {}. Using defaults.", path, e);
                StationConfig::default()
            }
        },
        Err(_) => StationConfig::default(),
    };

    info!("Starting charging station core...");
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStore::new());
    let station = Station::new(config, storage).await?;
    let handles = station.start();

    // Seed the station layout
    let admin = station.admin();
    admin.add_pile(UserRole::Admin, "F-01", ChargeType::Fast, Decimal::from(30))?;
    admin.add_pile(UserRole::Admin, "F-02", ChargeType::Fast, Decimal::from(30))?;
    admin.add_pile(UserRole::Admin, "S-01", ChargeType::Slow, Decimal::from(7))?;

    // Two users come in
    let lifecycle = station.lifecycle();
    let first = lifecycle.submit(1, ChargeType::Fast, Decimal::from(5)).await?;
    info!("User 1 queued as {}", first.queue_number);
    let second = lifecycle.submit(2, ChargeType::Slow, Decimal::new(1, 2)).await?;
    info!("User 2 queued as {}", second.queue_number);

    // Let the dispatcher and the monitor run; the tiny slow request
    // (0.01 kWh at 7 kWh/h, about five seconds) finishes within a couple
    // of monitor ticks.
    tokio::time::sleep(Duration::from_secs(12)).await;

    for request in [first.id, second.id] {
        let state = lifecycle.get_request(request).await?;
        info!("Request {} ({}): {}", request, state.queue_number, state.status);
        if let Some(order) = lifecycle.order_for_request(request).await? {
            info!(
                "  order {}: {} kWh over {}s, charge {} + service {} = {}",
                order.id,
                order.delivered_amount,
                order.duration_seconds,
                order.charge_fee,
                order.service_fee,
                order.total_fee
            );
        }
    }

    station.shutdown();
    for handle in handles {
        let _ = handle.await;
    }
    info!("Station core stopped");
    Ok(())
}
