//! Persistence seam
//!
//! The core treats durable storage as a trait; persistence technology is an
//! external collaborator. An in-memory implementation backs tests and the
//! demo binary.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::domain::{ChargeRequest, DomainResult, Order, RequestStatus, User};

/// Mutation applied to a request under the storage entry lock. The closure
/// must leave the request untouched when it returns an error; the store
/// discards the mutation in that case.
pub type RequestMutation = Box<dyn FnOnce(&mut ChargeRequest) -> DomainResult<()> + Send>;

/// Storage trait for persistence operations
#[async_trait]
pub trait Storage: Send + Sync {
    // Request operations
    async fn next_request_id(&self) -> i64;
    async fn save_request(&self, request: ChargeRequest) -> DomainResult<()>;
    async fn get_request(&self, id: i64) -> DomainResult<Option<ChargeRequest>>;
    /// Atomically mutate a request. The mutation runs while the entry is
    /// exclusively held, which is what makes state transitions a
    /// compare-and-set: the closure checks the current status and fails
    /// with `InvalidState` if another writer got there first.
    async fn update_request(&self, id: i64, mutation: RequestMutation)
        -> DomainResult<ChargeRequest>;
    async fn list_requests(&self) -> DomainResult<Vec<ChargeRequest>>;
    async fn list_requests_by_status(&self, status: RequestStatus)
        -> DomainResult<Vec<ChargeRequest>>;
    async fn list_requests_for_user(&self, user_id: i64) -> DomainResult<Vec<ChargeRequest>>;

    // Order operations (append-only)
    async fn save_order(&self, order: Order) -> DomainResult<()>;
    async fn get_order_for_request(&self, request_id: i64) -> DomainResult<Option<Order>>;
    async fn list_orders(&self) -> DomainResult<Vec<Order>>;
    async fn list_orders_for_user(&self, user_id: i64) -> DomainResult<Vec<Order>>;

    // User operations
    async fn next_user_id(&self) -> i64;
    async fn save_user(&self, user: User) -> DomainResult<()>;
    async fn get_user(&self, id: i64) -> DomainResult<Option<User>>;
    async fn list_users(&self) -> DomainResult<Vec<User>>;
}
