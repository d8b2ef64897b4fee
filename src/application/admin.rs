//! Admin control
//!
//! Thin façade over the registry, lifecycle and store for station
//! operators. Every operation checks the caller's role; identity and role
//! resolution happen outside the core.

use std::sync::Arc;

use log::info;
use rust_decimal::Decimal;

use crate::application::dispatcher::DispatchSignal;
use crate::application::registry::PileRegistry;
use crate::domain::{
    ChargeRequest, ChargeType, DomainError, DomainResult, Order, Pile, PileStatus, User, UserRole,
};
use crate::infrastructure::Storage;

/// Administrative operations over the station
pub struct AdminService {
    storage: Arc<dyn Storage>,
    registry: Arc<PileRegistry>,
    signal: Arc<DispatchSignal>,
}

impl AdminService {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<PileRegistry>,
        signal: Arc<DispatchSignal>,
    ) -> Self {
        Self {
            storage,
            registry,
            signal,
        }
    }

    fn ensure_admin(role: UserRole) -> DomainResult<()> {
        if role != UserRole::Admin {
            return Err(DomainError::Forbidden(
                "administrator role required".into(),
            ));
        }
        Ok(())
    }

    pub fn list_piles(
        &self,
        role: UserRole,
        charge_type: Option<ChargeType>,
        status: Option<PileStatus>,
    ) -> DomainResult<Vec<Pile>> {
        Self::ensure_admin(role)?;
        Ok(self.registry.list(charge_type, status))
    }

    pub fn add_pile(
        &self,
        role: UserRole,
        code: impl Into<String>,
        charge_type: ChargeType,
        power_rate: Decimal,
    ) -> DomainResult<Pile> {
        Self::ensure_admin(role)?;
        let pile = self.registry.add_pile(code, charge_type, power_rate)?;
        // A new available pile may unblock the queue.
        self.signal.trigger();
        Ok(pile)
    }

    /// Change a pile's operational status. Forcing a busy pile Offline or
    /// Faulted stops and bills its bound request first (see
    /// [`PileRegistry::set_status`]).
    pub async fn set_pile_status(
        &self,
        role: UserRole,
        pile_id: i64,
        status: PileStatus,
    ) -> DomainResult<Pile> {
        Self::ensure_admin(role)?;
        info!("Admin setting pile {} to {}", pile_id, status);
        let pile = self.registry.set_status(pile_id, status).await?;
        self.signal.trigger();
        Ok(pile)
    }

    pub async fn list_orders(&self, role: UserRole) -> DomainResult<Vec<Order>> {
        Self::ensure_admin(role)?;
        self.storage.list_orders().await
    }

    pub async fn list_orders_for_user(
        &self,
        role: UserRole,
        user_id: i64,
    ) -> DomainResult<Vec<Order>> {
        Self::ensure_admin(role)?;
        self.storage.list_orders_for_user(user_id).await
    }

    pub async fn list_requests(&self, role: UserRole) -> DomainResult<Vec<ChargeRequest>> {
        Self::ensure_admin(role)?;
        self.storage.list_requests().await
    }

    pub async fn list_users(&self, role: UserRole) -> DomainResult<Vec<User>> {
        Self::ensure_admin(role)?;
        self.storage.list_users().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::InMemoryStore;

    fn service() -> AdminService {
        AdminService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(PileRegistry::new()),
            Arc::new(DispatchSignal::new()),
        )
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() {
        let admin = service();
        assert!(matches!(
            admin.list_piles(UserRole::User, None, None),
            Err(DomainError::Forbidden(_))
        ));
        assert!(matches!(
            admin.list_orders(UserRole::User).await,
            Err(DomainError::Forbidden(_))
        ));
        assert!(matches!(
            admin.set_pile_status(UserRole::User, 1, PileStatus::Offline).await,
            Err(DomainError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn admin_manages_piles() {
        let admin = service();
        let pile = admin
            .add_pile(UserRole::Admin, "F-01", ChargeType::Fast, Decimal::from(30))
            .unwrap();
        let piles = admin.list_piles(UserRole::Admin, None, None).unwrap();
        assert_eq!(piles.len(), 1);

        let updated = admin
            .set_pile_status(UserRole::Admin, pile.id, PileStatus::Offline)
            .await
            .unwrap();
        assert_eq!(updated.status, PileStatus::Offline);
    }
}
