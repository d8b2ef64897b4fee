//! Request lifecycle manager
//!
//! Owns the request state machine (queued -> charging -> completed /
//! stopped, queued -> cancelled) and the one-active-request-per-user
//! invariant. Terminal transitions are a compare-and-set under the storage
//! entry lock, which is what decides the stop-vs-complete and
//! cancel-vs-dispatch races; queue membership arbitrates everything that
//! happens before a pile is bound.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{error, info, warn};
use rust_decimal::Decimal;

use crate::application::billing::compute_order;
use crate::application::dispatcher::DispatchSignal;
use crate::application::queue::WaitingQueue;
use crate::application::registry::{ForcedStopHandler, PileRegistry};
use crate::config::StationConfig;
use crate::domain::{
    ChargeRequest, ChargeType, DomainError, DomainResult, Order, RequestStatus, TariffTable,
};
use crate::infrastructure::Storage;

/// Why a charging session is being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishReason {
    /// Requested amount fully delivered
    Completed,
    /// Stopped by the user or an admin
    Stopped,
    /// Stopped because the bound pile faulted; the undelivered remainder
    /// is re-admitted at the head of its queue
    PileFaulted,
}

/// Lifecycle manager for charging requests
pub struct RequestLifecycle {
    storage: Arc<dyn Storage>,
    queue: Arc<WaitingQueue>,
    registry: Arc<PileRegistry>,
    signal: Arc<DispatchSignal>,
    tariffs: TariffTable,
    min_requeue_amount: Decimal,
    /// user id -> their sole non-terminal request id
    active: DashMap<i64, i64>,
}

impl RequestLifecycle {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<WaitingQueue>,
        registry: Arc<PileRegistry>,
        signal: Arc<DispatchSignal>,
        config: &StationConfig,
    ) -> Self {
        Self {
            storage,
            queue,
            registry,
            signal,
            tariffs: config.tariffs.clone(),
            min_requeue_amount: config.min_requeue_amount,
            active: DashMap::new(),
        }
    }

    /// Submit a new charging request. The active-index reservation and the
    /// enqueue happen as one unit: the DashMap entry reservation is the
    /// atomic check-then-act, and any later failure rolls it back.
    pub async fn submit(
        &self,
        user_id: i64,
        charge_type: ChargeType,
        amount: Decimal,
    ) -> DomainResult<ChargeRequest> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::Validation(
                "requested amount must be positive".into(),
            ));
        }

        let request_id = self.storage.next_request_id().await;
        match self.active.entry(user_id) {
            Entry::Occupied(_) => return Err(DomainError::ActiveRequestExists { user_id }),
            Entry::Vacant(slot) => {
                slot.insert(request_id);
            }
        }

        let result = self.admit(request_id, user_id, charge_type, amount).await;
        if result.is_err() {
            self.active
                .remove_if(&user_id, |_, rid| *rid == request_id);
        }
        result
    }

    async fn admit(
        &self,
        request_id: i64,
        user_id: i64,
        charge_type: ChargeType,
        amount: Decimal,
    ) -> DomainResult<ChargeRequest> {
        // Persist before enqueueing so the dispatcher never pops an id the
        // store does not know yet.
        let now = Utc::now();
        let request = ChargeRequest::new(request_id, user_id, "", charge_type, amount, now);
        self.storage.save_request(request).await?;

        let ticket = match self.queue.enqueue(request_id, charge_type) {
            Ok(ticket) => ticket,
            Err(e) => {
                // The persisted record must not linger as a phantom queued
                // request.
                if let Err(rollback) = self
                    .storage
                    .update_request(
                        request_id,
                        Box::new(|r| {
                            r.status = RequestStatus::Cancelled;
                            Ok(())
                        }),
                    )
                    .await
                {
                    error!(
                        "Failed to void rejected request {}: {}",
                        request_id, rollback
                    );
                }
                return Err(e);
            }
        };

        let queue_number = ticket.queue_number.clone();
        let request = self
            .storage
            .update_request(
                request_id,
                Box::new(move |r| {
                    r.queue_number = queue_number;
                    Ok(())
                }),
            )
            .await?;

        info!(
            "Request {} ({}) submitted: user {}, {} {} kWh",
            request_id, ticket.queue_number, user_id, charge_type, amount
        );
        self.signal.trigger();
        Ok(request)
    }

    /// The caller's sole non-terminal request, if any. Absence is an
    /// expected outcome, not an error.
    pub async fn active_request(&self, user_id: i64) -> DomainResult<Option<ChargeRequest>> {
        let Some(request_id) = self.active.get(&user_id).map(|r| *r) else {
            return Ok(None);
        };
        match self.storage.get_request(request_id).await? {
            Some(request) if !request.is_terminal() => Ok(Some(request)),
            _ => {
                // Stale index entry; drop it.
                self.active.remove_if(&user_id, |_, rid| *rid == request_id);
                Ok(None)
            }
        }
    }

    pub async fn get_request(&self, request_id: i64) -> DomainResult<ChargeRequest> {
        self.storage
            .get_request(request_id)
            .await?
            .ok_or_else(|| DomainError::not_found("request", request_id))
    }

    /// Waiting requests in dispatch order (read-only snapshot).
    pub async fn list_waiting(
        &self,
        charge_type: Option<ChargeType>,
    ) -> DomainResult<Vec<ChargeRequest>> {
        let mut requests = Vec::new();
        for id in self.queue.snapshot(charge_type) {
            if let Some(request) = self.storage.get_request(id).await? {
                requests.push(request);
            }
        }
        Ok(requests)
    }

    /// Cancel a queued request. Queue removal is the arbiter: once the
    /// dispatcher has popped the entry, cancellation reports the request is
    /// no longer queued.
    pub async fn cancel(&self, user_id: i64, request_id: i64) -> DomainResult<ChargeRequest> {
        let request = self.get_request(request_id).await?;
        self.check_owner(&request, user_id)?;

        if self.queue.remove(request_id).is_err() {
            // The pre-removal snapshot may predate a lost dispatch race;
            // re-read so the error names the actual state.
            let request = self.get_request(request_id).await?;
            return Err(self.not_cancellable(&request));
        }

        let request = self
            .storage
            .update_request(
                request_id,
                Box::new(|r| {
                    if r.status != RequestStatus::Queued {
                        return Err(DomainError::InvalidState(format!(
                            "request is {}, expected QUEUED",
                            r.status
                        )));
                    }
                    r.status = RequestStatus::Cancelled;
                    r.ended_at = Some(Utc::now());
                    Ok(())
                }),
            )
            .await?;

        self.active.remove_if(&user_id, |_, rid| *rid == request_id);
        info!("Request {} ({}) cancelled by user {}", request_id, request.queue_number, user_id);
        self.signal.trigger();
        Ok(request)
    }

    fn not_cancellable(&self, request: &ChargeRequest) -> DomainError {
        match request.status {
            RequestStatus::Charging => DomainError::InvalidState(
                "request is charging; stop it instead of cancelling".into(),
            ),
            status => DomainError::InvalidState(format!("request is already {}", status)),
        }
    }

    /// Stop an ongoing charging session early. Always succeeds for a
    /// charging request and produces a partial order.
    pub async fn stop(&self, user_id: i64, request_id: i64) -> DomainResult<ChargeRequest> {
        let request = self.get_request(request_id).await?;
        self.check_owner(&request, user_id)?;
        if request.status != RequestStatus::Charging {
            return Err(DomainError::InvalidState(format!(
                "request is {}, expected CHARGING",
                request.status
            )));
        }
        self.finalize(request_id, FinishReason::Stopped, Utc::now())
            .await
    }

    /// Update a queued request's type and/or amount. Amount-only changes
    /// keep the queue position; a type change re-enqueues at the tail of
    /// the other queue with a fresh queue number.
    pub async fn update(
        &self,
        user_id: i64,
        request_id: i64,
        new_type: Option<ChargeType>,
        new_amount: Option<Decimal>,
    ) -> DomainResult<ChargeRequest> {
        let request = self.get_request(request_id).await?;
        self.check_owner(&request, user_id)?;
        if let Some(amount) = new_amount {
            if amount <= Decimal::ZERO {
                return Err(DomainError::Validation(
                    "requested amount must be positive".into(),
                ));
            }
        }

        let type_changed = new_type.is_some_and(|t| t != request.charge_type);
        if !type_changed {
            // In-place; the storage entry lock against the dispatcher's
            // queued -> charging transition keeps this consistent.
            let request = self
                .storage
                .update_request(
                    request_id,
                    Box::new(move |r| {
                        if r.status != RequestStatus::Queued {
                            return Err(DomainError::InvalidState(format!(
                                "request is {}, only queued requests can be updated",
                                r.status
                            )));
                        }
                        if let Some(amount) = new_amount {
                            r.requested_amount = amount;
                        }
                        Ok(())
                    }),
                )
                .await?;
            info!("Request {} updated in place", request_id);
            return Ok(request);
        }

        let target_type = new_type.unwrap_or(request.charge_type);

        // The cross-queue move is one critical section, so the entry is
        // never outside both queues and a concurrent submission cannot
        // take its waiting-area slot. Failure means the dispatcher or a
        // cancellation won the race.
        let ticket = match self.queue.move_to(request_id, target_type) {
            Ok(ticket) => ticket,
            Err(_) => {
                let request = self.get_request(request_id).await?;
                return Err(DomainError::InvalidState(format!(
                    "request is {}, only queued requests can be updated",
                    request.status
                )));
            }
        };

        let queue_number = ticket.queue_number.clone();
        let request = self
            .storage
            .update_request(
                request_id,
                Box::new(move |r| {
                    // A stop or completion that slipped in leaves terminal
                    // records untouched.
                    if r.is_terminal() {
                        return Ok(());
                    }
                    r.charge_type = target_type;
                    if let Some(amount) = new_amount {
                        r.requested_amount = amount;
                    }
                    r.queue_number = queue_number;
                    // The dispatcher may legitimately grab the entry the
                    // moment it lands in the other queue; only still-queued
                    // requests get a fresh wait timestamp.
                    if r.status == RequestStatus::Queued {
                        r.queued_since = Utc::now();
                    }
                    Ok(())
                }),
            )
            .await?;

        info!(
            "Request {} moved to the {} queue as {}",
            request_id, target_type, ticket.queue_number
        );
        self.signal.trigger();
        Ok(request)
    }

    /// Natural completion, driven by the charging monitor. `ended_at` is
    /// the computed moment the requested amount was reached.
    pub async fn complete(
        &self,
        request_id: i64,
        ended_at: DateTime<Utc>,
    ) -> DomainResult<ChargeRequest> {
        self.finalize(request_id, FinishReason::Completed, ended_at)
            .await
    }

    /// The order produced when a request terminated, if any.
    pub async fn order_for_request(&self, request_id: i64) -> DomainResult<Option<Order>> {
        self.storage.get_order_for_request(request_id).await
    }

    /// The caller's own billing history, newest last.
    pub async fn order_history(&self, user_id: i64) -> DomainResult<Vec<Order>> {
        self.storage.list_orders_for_user(user_id).await
    }

    /// Rebuild the active-request index after a restart.
    pub fn rebuild_index(&self, requests: &[ChargeRequest]) {
        self.active.clear();
        for request in requests {
            if !request.is_terminal() {
                self.active.insert(request.user_id, request.id);
            }
        }
    }

    fn check_owner(&self, request: &ChargeRequest, user_id: i64) -> DomainResult<()> {
        if request.user_id != user_id {
            return Err(DomainError::Forbidden(format!(
                "request {} belongs to another user",
                request.id
            )));
        }
        Ok(())
    }

    /// Terminal transition of a charging request: exactly one caller wins
    /// the compare-and-set, computes the order, releases the pile and wakes
    /// the dispatcher.
    async fn finalize(
        &self,
        request_id: i64,
        reason: FinishReason,
        ended_at: DateTime<Utc>,
    ) -> DomainResult<ChargeRequest> {
        let snapshot = self.get_request(request_id).await?;
        if snapshot.status != RequestStatus::Charging {
            return Err(DomainError::InvalidState(format!(
                "request is {}, expected CHARGING",
                snapshot.status
            )));
        }
        let pile_id = snapshot.pile_id.ok_or_else(|| {
            DomainError::InvalidState(format!("charging request {} has no bound pile", request_id))
        })?;
        let pile = self.registry.get(pile_id)?;

        // The snapshot is stable: a charging request is only ever mutated
        // by its finalizer, and the CAS below elects exactly one.
        let order = compute_order(&snapshot, &pile, &self.tariffs, ended_at)?;

        let outcome = match reason {
            FinishReason::Completed => RequestStatus::Completed,
            FinishReason::Stopped | FinishReason::PileFaulted => RequestStatus::Stopped,
        };
        let order_end = order.ended_at;
        let request = self
            .storage
            .update_request(
                request_id,
                Box::new(move |r| {
                    if r.status != RequestStatus::Charging {
                        return Err(DomainError::InvalidState(format!(
                            "request is {}, expected CHARGING",
                            r.status
                        )));
                    }
                    r.status = outcome;
                    r.ended_at = Some(order_end);
                    Ok(())
                }),
            )
            .await?;

        self.storage.save_order(order.clone()).await?;
        self.active
            .remove_if(&request.user_id, |_, rid| *rid == request_id);
        self.registry.release(pile_id)?;

        info!(
            "Request {} ({}) {}: {} kWh delivered, total fee {}",
            request_id, request.queue_number, outcome, order.delivered_amount, order.total_fee
        );

        if reason == FinishReason::PileFaulted {
            let remainder = request.requested_amount - order.delivered_amount;
            if remainder >= self.min_requeue_amount {
                self.requeue_remainder(&request, remainder).await?;
            }
        }

        self.signal.trigger();
        Ok(request)
    }

    /// Re-admit the undelivered remainder of a fault-stopped session as a
    /// new request at the head of its type queue.
    async fn requeue_remainder(
        &self,
        finished: &ChargeRequest,
        remainder: Decimal,
    ) -> DomainResult<()> {
        let request_id = self.storage.next_request_id().await;
        match self.active.entry(finished.user_id) {
            Entry::Occupied(_) => {
                // The user raced in a fresh submission; do not displace it.
                warn!(
                    "User {} already has a new active request; fault remainder of {} kWh not requeued",
                    finished.user_id, remainder
                );
                return Ok(());
            }
            Entry::Vacant(slot) => {
                slot.insert(request_id);
            }
        }

        let now = Utc::now();
        let request = ChargeRequest::new(
            request_id,
            finished.user_id,
            "",
            finished.charge_type,
            remainder,
            now,
        );
        self.storage.save_request(request).await?;

        let ticket = self
            .queue
            .enqueue_front(request_id, finished.charge_type)?;
        let queue_number = ticket.queue_number.clone();
        self.storage
            .update_request(
                request_id,
                Box::new(move |r| {
                    r.queue_number = queue_number;
                    Ok(())
                }),
            )
            .await?;

        info!(
            "Fault remainder of request {} requeued as {} ({}): {} kWh",
            finished.id, request_id, ticket.queue_number, remainder
        );
        Ok(())
    }
}

#[async_trait]
impl ForcedStopHandler for RequestLifecycle {
    async fn force_stop(&self, request_id: i64, faulted: bool) -> DomainResult<()> {
        let reason = if faulted {
            FinishReason::PileFaulted
        } else {
            FinishReason::Stopped
        };
        self.finalize(request_id, reason, Utc::now()).await?;
        Ok(())
    }
}
