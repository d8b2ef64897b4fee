//! Charging monitor
//!
//! Natural completion is timer-driven: a charging session is finished once
//! `power_rate x elapsed` reaches the requested amount. The monitor wakes
//! every metering interval, computes each session's estimated end from the
//! pile's power rate, and finalizes sessions whose estimate has passed,
//! using the estimate itself (not the tick time) as the billing end.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::application::lifecycle::RequestLifecycle;
use crate::application::registry::PileRegistry;
use crate::domain::{ChargeRequest, DomainError, DomainResult, Pile, RequestStatus};
use crate::infrastructure::Storage;

/// Background task that completes sessions which have delivered their
/// requested amount.
pub struct ChargingMonitor {
    storage: Arc<dyn Storage>,
    registry: Arc<PileRegistry>,
    lifecycle: Arc<RequestLifecycle>,
    /// Metering interval in seconds (configuration)
    interval_secs: u64,
}

impl ChargingMonitor {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<PileRegistry>,
        lifecycle: Arc<RequestLifecycle>,
        interval_secs: u64,
    ) -> Self {
        Self {
            storage,
            registry,
            lifecycle,
            interval_secs,
        }
    }

    /// Spawn the metering loop.
    pub fn start(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Charging monitor started (metering interval: {}s)",
                self.interval_secs
            );
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.check_completed(Utc::now()).await {
                            warn!("Charging monitor check failed: {}", e);
                        }
                    }
                    _ = shutdown.notified() => {
                        info!("Charging monitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// One metering pass. Public so tests can drive it deterministically.
    pub async fn check_completed(&self, now: DateTime<Utc>) -> DomainResult<()> {
        let charging = self
            .storage
            .list_requests_by_status(RequestStatus::Charging)
            .await?;

        for request in charging {
            let Some(pile_id) = request.pile_id else {
                warn!("Charging request {} has no bound pile", request.id);
                continue;
            };
            let pile = match self.registry.get(pile_id) {
                Ok(pile) => pile,
                Err(_) => {
                    // Restart recovery rebuilds requests before the pile
                    // layout; the session resumes metering once its pile
                    // is registered again.
                    warn!(
                        "Charging request {} bound to unknown pile {}; skipping",
                        request.id, pile_id
                    );
                    continue;
                }
            };
            let Some(end) = estimated_end(&request, &pile) else {
                continue;
            };
            if now >= end {
                match self.lifecycle.complete(request.id, end).await {
                    Ok(_) => {}
                    // Lost the finalize race to a concurrent stop; fine.
                    Err(DomainError::InvalidState(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

/// When the session will have delivered its requested amount, given the
/// pile's power rate. `None` for sessions that have not started.
pub fn estimated_end(request: &ChargeRequest, pile: &Pile) -> Option<DateTime<Utc>> {
    let started_at = request.started_at?;
    if pile.power_rate <= Decimal::ZERO {
        return None;
    }
    let hours = request.requested_amount / pile.power_rate;
    let millis: i64 = (hours * Decimal::from(3_600_000)).round().try_into().ok()?;
    Some(started_at + chrono::Duration::milliseconds(millis))
}
