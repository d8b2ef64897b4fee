//! Pile registry
//!
//! Holds the station's pile pool. Per-entry DashMap locking makes
//! acquire/release a compare-and-set, which is the whole mutual-exclusion
//! story for pile binding: a pile can only move Available -> Busy once.
//!
//! Marking a busy pile Offline or Faulted must not silently abandon its
//! bound request, so the registry calls back into the lifecycle manager
//! through an injected [`ForcedStopHandler`] capability instead of holding
//! a back-reference.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{info, warn};
use rust_decimal::Decimal;

use crate::domain::{ChargeType, DomainError, DomainResult, Pile, PileStatus};

/// Capability the lifecycle manager injects so the registry can finalize a
/// bound request when its pile is forced out of service.
#[async_trait]
pub trait ForcedStopHandler: Send + Sync {
    /// Stop `request_id` and bill the partial delivery. `faulted` is true
    /// when the pile broke down (as opposed to an intentional shutdown),
    /// which re-admits the undelivered remainder.
    async fn force_stop(&self, request_id: i64, faulted: bool) -> DomainResult<()>;
}

/// Registry of charging piles
pub struct PileRegistry {
    piles: DashMap<i64, Pile>,
    id_counter: AtomicI64,
    stopper: OnceLock<Arc<dyn ForcedStopHandler>>,
}

impl PileRegistry {
    pub fn new() -> Self {
        Self {
            piles: DashMap::new(),
            id_counter: AtomicI64::new(1),
            stopper: OnceLock::new(),
        }
    }

    /// Wire in the forced-stop capability. Called once during station
    /// assembly.
    pub fn attach_stopper(&self, stopper: Arc<dyn ForcedStopHandler>) {
        if self.stopper.set(stopper).is_err() {
            warn!("Forced-stop handler attached twice; keeping the first");
        }
    }

    pub fn add_pile(
        &self,
        code: impl Into<String>,
        charge_type: ChargeType,
        power_rate: Decimal,
    ) -> DomainResult<Pile> {
        if power_rate <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "pile power rate must be positive".into(),
            ));
        }
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let pile = Pile::new(id, code, charge_type, power_rate);
        info!("Pile {} ({}) registered: {} {} kWh/h", id, pile.code, charge_type, power_rate);
        self.piles.insert(id, pile.clone());
        Ok(pile)
    }

    /// Restore a persisted pile, e.g. when reloading station layout.
    pub fn insert_pile(&self, pile: Pile) {
        let next = pile.id + 1;
        self.id_counter.fetch_max(next, Ordering::SeqCst);
        self.piles.insert(pile.id, pile);
    }

    pub fn get(&self, pile_id: i64) -> DomainResult<Pile> {
        self.piles
            .get(&pile_id)
            .map(|p| p.clone())
            .ok_or_else(|| DomainError::not_found("pile", pile_id))
    }

    /// Piles matching the optional filters, ordered by id.
    pub fn list(&self, charge_type: Option<ChargeType>, status: Option<PileStatus>) -> Vec<Pile> {
        let mut piles: Vec<Pile> = self
            .piles
            .iter()
            .filter(|p| charge_type.map_or(true, |t| p.charge_type == t))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .map(|p| p.clone())
            .collect();
        piles.sort_by_key(|p| p.id);
        piles
    }

    /// Lowest-id available pile of the given type, if any.
    pub fn find_available(&self, charge_type: ChargeType) -> Option<i64> {
        self.list(Some(charge_type), Some(PileStatus::Available))
            .first()
            .map(|p| p.id)
    }

    /// Atomically move a pile Available -> Busy and bind the request.
    /// Fails fast with `PileUnavailable` when the pile was taken by a
    /// concurrent dispatch pass or forced out of service.
    pub fn try_acquire(&self, pile_id: i64, request_id: i64) -> DomainResult<Pile> {
        let mut pile = self
            .piles
            .get_mut(&pile_id)
            .ok_or_else(|| DomainError::not_found("pile", pile_id))?;
        if pile.status != PileStatus::Available {
            return Err(DomainError::PileUnavailable(pile_id));
        }
        pile.status = PileStatus::Busy;
        pile.bound_request_id = Some(request_id);
        Ok(pile.clone())
    }

    /// Point an already-acquired pile at a different request. Used by the
    /// dispatcher when the queue head it acquired for was cancelled between
    /// peek and pop.
    pub fn rebind(&self, pile_id: i64, request_id: i64) -> DomainResult<()> {
        let mut pile = self
            .piles
            .get_mut(&pile_id)
            .ok_or_else(|| DomainError::not_found("pile", pile_id))?;
        if pile.status != PileStatus::Busy {
            return Err(DomainError::InvalidState(format!(
                "pile {} is not busy, cannot rebind",
                pile_id
            )));
        }
        pile.bound_request_id = Some(request_id);
        Ok(())
    }

    /// Unbind the pile after its request terminated. Busy piles return to
    /// Available; an admin-forced Offline/Faulted status set while the
    /// session was being wound down is left in place.
    pub fn release(&self, pile_id: i64) -> DomainResult<Pile> {
        let mut pile = self
            .piles
            .get_mut(&pile_id)
            .ok_or_else(|| DomainError::not_found("pile", pile_id))?;
        pile.bound_request_id = None;
        if pile.status == PileStatus::Busy {
            pile.status = PileStatus::Available;
        }
        Ok(pile.clone())
    }

    /// Admin transition of a pile's operational status.
    ///
    /// The new status is written first so the dispatcher can no longer
    /// acquire the pile; only then is any bound request force-stopped.
    pub async fn set_status(&self, pile_id: i64, status: PileStatus) -> DomainResult<Pile> {
        if status == PileStatus::Busy {
            return Err(DomainError::InvalidState(
                "BUSY is managed by the dispatcher, not set directly".into(),
            ));
        }

        let bound = {
            let mut pile = self
                .piles
                .get_mut(&pile_id)
                .ok_or_else(|| DomainError::not_found("pile", pile_id))?;
            if status == PileStatus::Available && pile.bound_request_id.is_some() {
                return Err(DomainError::InvalidState(
                    "pile still has a bound request; stop it first".into(),
                ));
            }
            pile.status = status;
            pile.bound_request_id
        };

        if let Some(request_id) = bound {
            let stopper = self.stopper.get().ok_or_else(|| {
                DomainError::Storage("forced-stop handler not attached".into())
            })?;
            info!(
                "Pile {} forced to {} with request {} bound; stopping it",
                pile_id, status, request_id
            );
            stopper
                .force_stop(request_id, status == PileStatus::Faulted)
                .await?;
        }

        self.get(pile_id)
    }
}

impl Default for PileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct RecordingStopper {
        called: AtomicBool,
        last_faulted: AtomicBool,
    }

    impl RecordingStopper {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                called: AtomicBool::new(false),
                last_faulted: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ForcedStopHandler for RecordingStopper {
        async fn force_stop(&self, _request_id: i64, faulted: bool) -> DomainResult<()> {
            self.called.store(true, Ordering::SeqCst);
            self.last_faulted.store(faulted, Ordering::SeqCst);
            Ok(())
        }
    }

    fn registry_with_pile() -> (PileRegistry, i64) {
        let registry = PileRegistry::new();
        let pile = registry
            .add_pile("F-01", ChargeType::Fast, Decimal::from(30))
            .unwrap();
        (registry, pile.id)
    }

    #[test]
    fn acquire_is_a_one_shot_cas() {
        let (registry, pile_id) = registry_with_pile();
        let pile = registry.try_acquire(pile_id, 7).unwrap();
        assert_eq!(pile.status, PileStatus::Busy);
        assert_eq!(pile.bound_request_id, Some(7));

        let err = registry.try_acquire(pile_id, 8).unwrap_err();
        assert!(matches!(err, DomainError::PileUnavailable(_)));
    }

    #[test]
    fn release_returns_busy_pile_to_available() {
        let (registry, pile_id) = registry_with_pile();
        registry.try_acquire(pile_id, 7).unwrap();
        let pile = registry.release(pile_id).unwrap();
        assert_eq!(pile.status, PileStatus::Available);
        assert_eq!(pile.bound_request_id, None);
    }

    #[tokio::test]
    async fn release_preserves_admin_forced_status() {
        let (registry, pile_id) = registry_with_pile();
        registry.attach_stopper(RecordingStopper::new());
        registry.try_acquire(pile_id, 7).unwrap();
        registry.set_status(pile_id, PileStatus::Offline).await.unwrap();

        let pile = registry.release(pile_id).unwrap();
        assert_eq!(pile.status, PileStatus::Offline);
        assert_eq!(pile.bound_request_id, None);
    }

    #[tokio::test]
    async fn forcing_a_busy_pile_stops_its_request() {
        let (registry, pile_id) = registry_with_pile();
        let stopper = RecordingStopper::new();
        registry.attach_stopper(stopper.clone());
        registry.try_acquire(pile_id, 7).unwrap();

        registry.set_status(pile_id, PileStatus::Faulted).await.unwrap();
        assert!(stopper.called.load(Ordering::SeqCst));
        assert!(stopper.last_faulted.load(Ordering::SeqCst));

        // The pile was marked before the stop, so no new acquire can race in.
        let err = registry.try_acquire(pile_id, 8).unwrap_err();
        assert!(matches!(err, DomainError::PileUnavailable(_)));
    }

    #[test]
    fn rejects_nonpositive_power_rate() {
        let registry = PileRegistry::new();
        let err = registry
            .add_pile("X-01", ChargeType::Slow, Decimal::ZERO)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn find_available_honors_type_partition() {
        let registry = PileRegistry::new();
        let fast = registry
            .add_pile("F-01", ChargeType::Fast, Decimal::from(30))
            .unwrap();
        registry
            .add_pile("S-01", ChargeType::Slow, Decimal::from(7))
            .unwrap();
        assert_eq!(registry.find_available(ChargeType::Fast), Some(fast.id));
        registry.try_acquire(fast.id, 1).unwrap();
        assert_eq!(registry.find_available(ChargeType::Fast), None);
        assert!(registry.find_available(ChargeType::Slow).is_some());
    }
}
