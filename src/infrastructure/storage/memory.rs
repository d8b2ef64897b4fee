//! In-memory storage implementation

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::error;

use super::{RequestMutation, Storage};
use crate::domain::{ChargeRequest, DomainError, DomainResult, Order, RequestStatus, User};

/// In-memory store for tests, the demo binary, and embedding applications
/// that bring their own durability.
pub struct InMemoryStore {
    requests: DashMap<i64, ChargeRequest>,
    /// Keyed by request id; a request produces at most one order.
    orders: DashMap<i64, Order>,
    users: DashMap<i64, User>,
    request_counter: AtomicI64,
    user_counter: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            orders: DashMap::new(),
            users: DashMap::new(),
            request_counter: AtomicI64::new(1),
            user_counter: AtomicI64::new(1),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn next_request_id(&self) -> i64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn save_request(&self, request: ChargeRequest) -> DomainResult<()> {
        // Keep the counter ahead of externally assigned ids.
        self.request_counter.fetch_max(request.id + 1, Ordering::SeqCst);
        self.requests.insert(request.id, request);
        Ok(())
    }

    async fn get_request(&self, id: i64) -> DomainResult<Option<ChargeRequest>> {
        Ok(self.requests.get(&id).map(|r| r.clone()))
    }

    async fn update_request(
        &self,
        id: i64,
        mutation: RequestMutation,
    ) -> DomainResult<ChargeRequest> {
        let mut entry = self
            .requests
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found("request", id))?;
        // Apply to a copy so a failed mutation leaves the record untouched.
        let mut updated = entry.clone();
        mutation(&mut updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    async fn list_requests(&self) -> DomainResult<Vec<ChargeRequest>> {
        let mut requests: Vec<ChargeRequest> = self.requests.iter().map(|r| r.clone()).collect();
        requests.sort_by_key(|r| r.id);
        Ok(requests)
    }

    async fn list_requests_by_status(
        &self,
        status: RequestStatus,
    ) -> DomainResult<Vec<ChargeRequest>> {
        let mut requests: Vec<ChargeRequest> = self
            .requests
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.clone())
            .collect();
        requests.sort_by_key(|r| (r.created_at, r.id));
        Ok(requests)
    }

    async fn list_requests_for_user(&self, user_id: i64) -> DomainResult<Vec<ChargeRequest>> {
        let mut requests: Vec<ChargeRequest> = self
            .requests
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        requests.sort_by_key(|r| r.id);
        Ok(requests)
    }

    async fn save_order(&self, order: Order) -> DomainResult<()> {
        match self.orders.entry(order.request_id) {
            Entry::Occupied(_) => {
                // Orders are produced exactly once per terminal request; a
                // second save is an internal-consistency fault.
                error!("Second order for request {} rejected", order.request_id);
                Err(DomainError::DuplicateRequest(order.request_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(())
            }
        }
    }

    async fn get_order_for_request(&self, request_id: i64) -> DomainResult<Option<Order>> {
        Ok(self.orders.get(&request_id).map(|o| o.clone()))
    }

    async fn list_orders(&self) -> DomainResult<Vec<Order>> {
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        orders.sort_by_key(|o| (o.created_at, o.request_id));
        Ok(orders)
    }

    async fn list_orders_for_user(&self, user_id: i64) -> DomainResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .map(|o| o.clone())
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.request_id));
        Ok(orders)
    }

    async fn next_user_id(&self) -> i64 {
        self.user_counter.fetch_add(1, Ordering::SeqCst)
    }

    async fn save_user(&self, user: User) -> DomainResult<()> {
        self.user_counter.fetch_max(user.id + 1, Ordering::SeqCst);
        self.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: i64) -> DomainResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn list_users(&self) -> DomainResult<Vec<User>> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::domain::ChargeType;

    fn sample_request(id: i64) -> ChargeRequest {
        ChargeRequest::new(id, 7, "F1", ChargeType::Fast, Decimal::from(10), Utc::now())
    }

    fn sample_order(request_id: i64) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            request_id,
            user_id: 7,
            pile_id: 1,
            started_at: now,
            ended_at: now,
            delivered_amount: Decimal::from(5),
            duration_seconds: 600,
            charge_fee: Decimal::new(350, 2),
            service_fee: Decimal::new(400, 2),
            total_fee: Decimal::new(750, 2),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn failed_mutation_leaves_the_request_untouched() {
        let store = InMemoryStore::new();
        store.save_request(sample_request(1)).await.unwrap();

        let err = store
            .update_request(
                1,
                Box::new(|r| {
                    r.status = RequestStatus::Charging;
                    Err(DomainError::InvalidState("nope".into()))
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let request = store.get_request(1).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Queued);
    }

    #[tokio::test]
    async fn orders_are_append_only() {
        let store = InMemoryStore::new();
        store.save_order(sample_order(1)).await.unwrap();
        let err = store.save_order(sample_order(1)).await.unwrap_err();
        assert!(matches!(err, DomainError::DuplicateRequest(1)));
    }

    #[tokio::test]
    async fn request_ids_stay_ahead_of_saved_records() {
        let store = InMemoryStore::new();
        store.save_request(sample_request(41)).await.unwrap();
        assert!(store.next_request_id().await > 41);
    }
}
