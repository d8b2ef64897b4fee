//! Dispatcher
//!
//! Matches queued requests to available piles. Runs as a single consumer
//! task woken by [`DispatchSignal`] after every relevant event (enqueue,
//! cancellation, pile released, pile back in service) rather than polling.
//! Repeated triggers during a pass coalesce into one follow-up pass, so the
//! reaction is re-entrant-safe by construction.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::application::queue::WaitingQueue;
use crate::application::registry::PileRegistry;
use crate::domain::{ChargeType, DomainError, DomainResult, RequestStatus};
use crate::infrastructure::Storage;

/// Wake-up signal for the dispatcher task. Triggers are level-coalescing:
/// any number of triggers while a pass runs result in exactly one more pass.
pub struct DispatchSignal {
    notify: Notify,
}

impl DispatchSignal {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
        }
    }

    pub fn trigger(&self) {
        // Stores a permit even when nobody is waiting yet.
        self.notify.notify_one();
    }

    pub async fn triggered(&self) {
        self.notify.notified().await;
    }
}

impl Default for DispatchSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Matches waiting requests to available piles, strict FCFS per type.
pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    queue: Arc<WaitingQueue>,
    registry: Arc<PileRegistry>,
    signal: Arc<DispatchSignal>,
}

impl Dispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<WaitingQueue>,
        registry: Arc<PileRegistry>,
        signal: Arc<DispatchSignal>,
    ) -> Self {
        Self {
            storage,
            queue,
            registry,
            signal,
        }
    }

    /// One full matching pass over both type pools. Stops at the idle
    /// fixed point where no (available pile, queued request) pair remains.
    pub async fn dispatch_pass(&self) -> DomainResult<()> {
        for charge_type in [ChargeType::Fast, ChargeType::Slow] {
            self.dispatch_type(charge_type).await?;
        }
        Ok(())
    }

    async fn dispatch_type(&self, charge_type: ChargeType) -> DomainResult<()> {
        loop {
            let Some(candidate) = self.queue.peek_next(charge_type) else {
                break;
            };
            let Some(pile_id) = self.registry.find_available(charge_type) else {
                break;
            };

            // Acquire before popping so a lost race leaves the request at
            // the queue head for the pass that won the pile.
            let pile = match self.registry.try_acquire(pile_id, candidate) {
                Ok(pile) => pile,
                Err(DomainError::PileUnavailable(_)) => {
                    // Another pass or an admin action took the pile; rescan.
                    debug!("Lost acquire race for pile {}, rescanning", pile_id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let Some(request_id) = self.queue.pop_next(charge_type) else {
                // Queue drained between peek and acquire (cancellation).
                self.registry.release(pile_id)?;
                break;
            };
            if request_id != candidate {
                // The peeked head was removed concurrently; the pile now
                // serves whatever FCFS yields next.
                self.registry.rebind(pile_id, request_id)?;
            }

            let started_at = Utc::now();
            let assignment = self
                .storage
                .update_request(
                    request_id,
                    Box::new(move |request| {
                        if request.status != RequestStatus::Queued {
                            return Err(DomainError::InvalidState(format!(
                                "request is {}, expected QUEUED",
                                request.status
                            )));
                        }
                        request.status = RequestStatus::Charging;
                        request.started_at = Some(started_at);
                        request.pile_id = Some(pile_id);
                        Ok(())
                    }),
                )
                .await;

            match assignment {
                Ok(request) => {
                    info!(
                        "Dispatched request {} ({}) to pile {} ({})",
                        request.id, request.queue_number, pile.id, pile.code
                    );
                }
                Err(e) => {
                    // A popped entry should always be assignable; put the
                    // pile back and surface the inconsistency.
                    warn!("Failed to assign request {}: {}", request_id, e);
                    self.registry.release(pile_id)?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Spawn the event-triggered dispatch loop.
    pub fn spawn(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Dispatcher started");
            loop {
                tokio::select! {
                    _ = self.signal.triggered() => {
                        if let Err(e) = self.dispatch_pass().await {
                            warn!("Dispatch pass failed: {}", e);
                        }
                    }
                    _ = shutdown.notified() => {
                        info!("Dispatcher shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::{ChargeRequest, PileStatus};
    use crate::infrastructure::InMemoryStore;

    struct Fixture {
        storage: Arc<dyn Storage>,
        queue: Arc<WaitingQueue>,
        registry: Arc<PileRegistry>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStore::new());
        let queue = Arc::new(WaitingQueue::new(None));
        let registry = Arc::new(PileRegistry::new());
        let dispatcher = Dispatcher::new(
            storage.clone(),
            queue.clone(),
            registry.clone(),
            Arc::new(DispatchSignal::new()),
        );
        Fixture {
            storage,
            queue,
            registry,
            dispatcher,
        }
    }

    async fn queue_request(f: &Fixture, id: i64, user_id: i64, charge_type: ChargeType) {
        let ticket = f.queue.enqueue(id, charge_type).unwrap();
        let request = ChargeRequest::new(
            id,
            user_id,
            ticket.queue_number,
            charge_type,
            Decimal::from(10),
            Utc::now(),
        );
        f.storage.save_request(request).await.unwrap();
    }

    #[tokio::test]
    async fn assigns_head_to_matching_available_pile() {
        let f = fixture();
        let pile = f
            .registry
            .add_pile("F-01", ChargeType::Fast, Decimal::from(30))
            .unwrap();
        queue_request(&f, 1, 100, ChargeType::Fast).await;

        f.dispatcher.dispatch_pass().await.unwrap();

        let request = f.storage.get_request(1).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Charging);
        assert_eq!(request.pile_id, Some(pile.id));
        assert!(request.started_at.is_some());
        assert_eq!(f.registry.get(pile.id).unwrap().status, PileStatus::Busy);
        assert_eq!(f.queue.size(ChargeType::Fast), 0);
    }

    #[tokio::test]
    async fn respects_type_partition() {
        let f = fixture();
        f.registry
            .add_pile("S-01", ChargeType::Slow, Decimal::from(7))
            .unwrap();
        queue_request(&f, 1, 100, ChargeType::Fast).await;

        f.dispatcher.dispatch_pass().await.unwrap();

        let request = f.storage.get_request(1).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Queued);
        assert_eq!(f.queue.size(ChargeType::Fast), 1);
    }

    #[tokio::test]
    async fn fcfs_when_one_pile_serves_two_requests() {
        let f = fixture();
        let pile = f
            .registry
            .add_pile("F-01", ChargeType::Fast, Decimal::from(30))
            .unwrap();
        queue_request(&f, 1, 100, ChargeType::Fast).await;
        queue_request(&f, 2, 200, ChargeType::Fast).await;

        f.dispatcher.dispatch_pass().await.unwrap();

        let first = f.storage.get_request(1).await.unwrap().unwrap();
        let second = f.storage.get_request(2).await.unwrap().unwrap();
        assert_eq!(first.status, RequestStatus::Charging);
        assert_eq!(second.status, RequestStatus::Queued);

        // Pile frees up: the earlier enqueue is long gone, the next in
        // line gets it.
        f.registry.release(pile.id).unwrap();
        f.storage
            .update_request(
                1,
                Box::new(|r| {
                    r.status = RequestStatus::Completed;
                    Ok(())
                }),
            )
            .await
            .unwrap();
        f.dispatcher.dispatch_pass().await.unwrap();

        let second = f.storage.get_request(2).await.unwrap().unwrap();
        assert_eq!(second.status, RequestStatus::Charging);
        assert_eq!(second.pile_id, Some(pile.id));
    }

    #[tokio::test]
    async fn idle_pass_is_a_fixed_point() {
        let f = fixture();
        f.registry
            .add_pile("F-01", ChargeType::Fast, Decimal::from(30))
            .unwrap();
        // Empty queue, available pile: nothing to do, nothing changes.
        f.dispatcher.dispatch_pass().await.unwrap();
        assert_eq!(
            f.registry.list(None, Some(PileStatus::Available)).len(),
            1
        );
    }

    #[tokio::test]
    async fn exactly_one_wins_a_single_pile() {
        let f = fixture();
        f.registry
            .add_pile("F-01", ChargeType::Fast, Decimal::from(30))
            .unwrap();
        queue_request(&f, 1, 100, ChargeType::Fast).await;
        queue_request(&f, 2, 200, ChargeType::Fast).await;

        // Two near-simultaneous triggers resolve to two passes; the second
        // finds no pile and leaves request 2 queued.
        f.dispatcher.dispatch_pass().await.unwrap();
        f.dispatcher.dispatch_pass().await.unwrap();

        let charging = f
            .storage
            .list_requests_by_status(RequestStatus::Charging)
            .await
            .unwrap();
        assert_eq!(charging.len(), 1);
        assert_eq!(f.queue.size(ChargeType::Fast), 1);
    }
}
