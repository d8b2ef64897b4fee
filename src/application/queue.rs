//! Waiting queues
//!
//! One FCFS queue per charge type, both guarded by a single mutex so queue
//! membership is the arbiter between cancellation and dispatch: whichever
//! side removes an entry first wins, the other observes its absence.
//!
//! The queue is a derived view over requests with status `Queued`; after a
//! restart it is rebuilt from the persisted requests ordered by creation
//! time.

use std::collections::VecDeque;
use std::sync::Mutex;

use log::{error, info};

use crate::domain::{ChargeRequest, ChargeType, DomainError, DomainResult, RequestStatus};

#[derive(Debug, Clone, Copy)]
struct Entry {
    request_id: i64,
    seq: u64,
}

#[derive(Debug, Default)]
struct TypeQueue {
    entries: VecDeque<Entry>,
    /// Next sequence number to hand out; strictly increasing, never reused
    next_seq: u64,
}

impl TypeQueue {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_seq: 1,
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[derive(Debug)]
struct QueueState {
    fast: TypeQueue,
    slow: TypeQueue,
}

impl QueueState {
    fn of(&mut self, charge_type: ChargeType) -> &mut TypeQueue {
        match charge_type {
            ChargeType::Fast => &mut self.fast,
            ChargeType::Slow => &mut self.slow,
        }
    }

    fn contains(&self, request_id: i64) -> bool {
        self.fast.entries.iter().any(|e| e.request_id == request_id)
            || self.slow.entries.iter().any(|e| e.request_id == request_id)
    }

    fn total_len(&self) -> usize {
        self.fast.entries.len() + self.slow.entries.len()
    }
}

/// A successful enqueue: the assigned sequence number and the derived
/// queue number shown to the user.
#[derive(Debug, Clone)]
pub struct QueueTicket {
    pub seq: u64,
    pub queue_number: String,
}

/// Per-type FCFS waiting queues
pub struct WaitingQueue {
    state: Mutex<QueueState>,
    capacity: Option<usize>,
}

impl WaitingQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                fast: TypeQueue::new(),
                slow: TypeQueue::new(),
            }),
            capacity,
        }
    }

    fn format_queue_number(charge_type: ChargeType, seq: u64) -> String {
        format!("{}{}", charge_type.prefix(), seq)
    }

    /// Append a request to the tail of its type queue.
    pub fn enqueue(&self, request_id: i64, charge_type: ChargeType) -> DomainResult<QueueTicket> {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        if state.contains(request_id) {
            // The lifecycle manager's single-writer discipline should make
            // this impossible; treat it as an internal-consistency fault.
            error!("Duplicate enqueue attempt for request {}", request_id);
            return Err(DomainError::DuplicateRequest(request_id));
        }
        if let Some(capacity) = self.capacity {
            if state.total_len() >= capacity {
                return Err(DomainError::WaitingAreaFull { capacity });
            }
        }
        let queue = state.of(charge_type);
        let seq = queue.take_seq();
        queue.entries.push_back(Entry { request_id, seq });
        Ok(QueueTicket {
            seq,
            queue_number: Self::format_queue_number(charge_type, seq),
        })
    }

    /// Insert a request at the head of its type queue. Used when a pile
    /// fault re-admits the undelivered remainder of a session; such work
    /// was already admitted once, so the capacity cap does not apply.
    pub fn enqueue_front(&self, request_id: i64, charge_type: ChargeType) -> DomainResult<QueueTicket> {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        if state.contains(request_id) {
            error!("Duplicate enqueue attempt for request {}", request_id);
            return Err(DomainError::DuplicateRequest(request_id));
        }
        let queue = state.of(charge_type);
        let seq = queue.take_seq();
        queue.entries.push_front(Entry { request_id, seq });
        Ok(QueueTicket {
            seq,
            queue_number: Self::format_queue_number(charge_type, seq),
        })
    }

    /// Head of the type queue without removing it.
    pub fn peek_next(&self, charge_type: ChargeType) -> Option<i64> {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        state.of(charge_type).entries.front().map(|e| e.request_id)
    }

    /// Remove and return the head of the type queue.
    pub fn pop_next(&self, charge_type: ChargeType) -> Option<i64> {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        state.of(charge_type).entries.pop_front().map(|e| e.request_id)
    }

    /// Remove a specific entry, wherever it is. `NotFound` if the request
    /// is not queued (already dispatched, terminal, or unknown).
    pub fn remove(&self, request_id: i64) -> DomainResult<()> {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        let state = &mut *state;
        for queue in [&mut state.fast, &mut state.slow] {
            if let Some(pos) = queue.entries.iter().position(|e| e.request_id == request_id) {
                queue.entries.remove(pos);
                return Ok(());
            }
        }
        Err(DomainError::not_found("queued request", request_id))
    }

    /// Move a queued request to the tail of another type queue as one
    /// operation; the entry is never outside both queues. Already-admitted
    /// entries keep their waiting-area slot, so the capacity cap does not
    /// apply. `NotFound` if the request is not queued.
    pub fn move_to(&self, request_id: i64, charge_type: ChargeType) -> DomainResult<QueueTicket> {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        let state = &mut *state;
        let mut found = false;
        for queue in [&mut state.fast, &mut state.slow] {
            if let Some(pos) = queue.entries.iter().position(|e| e.request_id == request_id) {
                queue.entries.remove(pos);
                found = true;
                break;
            }
        }
        if !found {
            return Err(DomainError::not_found("queued request", request_id));
        }
        let queue = state.of(charge_type);
        let seq = queue.take_seq();
        queue.entries.push_back(Entry { request_id, seq });
        Ok(QueueTicket {
            seq,
            queue_number: Self::format_queue_number(charge_type, seq),
        })
    }

    pub fn size(&self, charge_type: ChargeType) -> usize {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        state.of(charge_type).entries.len()
    }

    pub fn total_size(&self) -> usize {
        self.state.lock().expect("waiting queue poisoned").total_len()
    }

    /// Queued request ids in dispatch order; both types (fast first) when
    /// no filter is given.
    pub fn snapshot(&self, charge_type: Option<ChargeType>) -> Vec<i64> {
        let state = self.state.lock().expect("waiting queue poisoned");
        let collect = |q: &TypeQueue| q.entries.iter().map(|e| e.request_id).collect::<Vec<_>>();
        match charge_type {
            Some(ChargeType::Fast) => collect(&state.fast),
            Some(ChargeType::Slow) => collect(&state.slow),
            None => {
                let mut ids = collect(&state.fast);
                ids.extend(collect(&state.slow));
                ids
            }
        }
    }

    /// Rebuild the derived queue view after a restart.
    ///
    /// Queued requests re-enter their type queue ordered by (queued_since,
    /// id); the per-type sequence counters resume above the highest queue
    /// number ever persisted so numbers are never reused.
    pub fn rebuild(&self, requests: &[ChargeRequest]) {
        let mut state = self.state.lock().expect("waiting queue poisoned");
        state.fast = TypeQueue::new();
        state.slow = TypeQueue::new();

        for request in requests {
            if let Some(seq) = parse_queue_seq(&request.queue_number, request.charge_type) {
                let queue = state.of(request.charge_type);
                if seq >= queue.next_seq {
                    queue.next_seq = seq + 1;
                }
            }
        }

        let mut queued: Vec<&ChargeRequest> = requests
            .iter()
            .filter(|r| r.status == RequestStatus::Queued)
            .collect();
        queued.sort_by_key(|r| (r.queued_since, r.id));

        for request in queued {
            let seq = parse_queue_seq(&request.queue_number, request.charge_type)
                .unwrap_or_else(|| state.of(request.charge_type).take_seq());
            state.of(request.charge_type).entries.push_back(Entry {
                request_id: request.id,
                seq,
            });
        }

        info!(
            "Waiting queue rebuilt: fast={}, slow={}, next F#{}, next S#{}",
            state.fast.entries.len(),
            state.slow.entries.len(),
            state.fast.next_seq,
            state.slow.next_seq
        );
    }
}

fn parse_queue_seq(queue_number: &str, charge_type: ChargeType) -> Option<u64> {
    queue_number
        .strip_prefix(charge_type.prefix())?
        .parse::<u64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    fn sample_request(id: i64, charge_type: ChargeType, queue_number: &str, offset_secs: i64) -> ChargeRequest {
        let now = Utc::now() + Duration::seconds(offset_secs);
        ChargeRequest::new(id, id * 10, queue_number, charge_type, Decimal::from(10), now)
    }

    #[test]
    fn fcfs_ordering_within_type() {
        let queue = WaitingQueue::new(None);
        let t1 = queue.enqueue(1, ChargeType::Fast).unwrap();
        let t2 = queue.enqueue(2, ChargeType::Fast).unwrap();
        assert!(t1.seq < t2.seq);
        assert_eq!(t1.queue_number, "F1");
        assert_eq!(t2.queue_number, "F2");
        assert_eq!(queue.pop_next(ChargeType::Fast), Some(1));
        assert_eq!(queue.pop_next(ChargeType::Fast), Some(2));
        assert_eq!(queue.pop_next(ChargeType::Fast), None);
    }

    #[test]
    fn types_have_independent_queues_and_numbering() {
        let queue = WaitingQueue::new(None);
        queue.enqueue(1, ChargeType::Fast).unwrap();
        let t = queue.enqueue(2, ChargeType::Slow).unwrap();
        assert_eq!(t.queue_number, "S1");
        assert_eq!(queue.size(ChargeType::Fast), 1);
        assert_eq!(queue.size(ChargeType::Slow), 1);
        assert_eq!(queue.peek_next(ChargeType::Slow), Some(2));
    }

    #[test]
    fn duplicate_enqueue_is_an_internal_fault() {
        let queue = WaitingQueue::new(None);
        queue.enqueue(1, ChargeType::Fast).unwrap();
        let err = queue.enqueue(1, ChargeType::Slow).unwrap_err();
        assert!(matches!(err, DomainError::DuplicateRequest(1)));
    }

    #[test]
    fn remove_reports_absence() {
        let queue = WaitingQueue::new(None);
        queue.enqueue(1, ChargeType::Fast).unwrap();
        assert!(queue.remove(1).is_ok());
        assert!(matches!(
            queue.remove(1),
            Err(DomainError::NotFound { .. })
        ));
    }

    #[test]
    fn capacity_applies_across_both_types() {
        let queue = WaitingQueue::new(Some(2));
        queue.enqueue(1, ChargeType::Fast).unwrap();
        queue.enqueue(2, ChargeType::Slow).unwrap();
        let err = queue.enqueue(3, ChargeType::Fast).unwrap_err();
        assert!(matches!(err, DomainError::WaitingAreaFull { capacity: 2 }));
    }

    #[test]
    fn front_insert_bypasses_capacity_and_goes_first() {
        let queue = WaitingQueue::new(Some(1));
        queue.enqueue(1, ChargeType::Fast).unwrap();
        queue.enqueue_front(2, ChargeType::Fast).unwrap();
        assert_eq!(queue.snapshot(Some(ChargeType::Fast)), vec![2, 1]);
    }

    #[test]
    fn move_between_queues_keeps_the_waiting_area_slot() {
        let queue = WaitingQueue::new(Some(2));
        queue.enqueue(1, ChargeType::Fast).unwrap();
        queue.enqueue(2, ChargeType::Slow).unwrap();

        // Capacity is full, but the move does not change the total count.
        let ticket = queue.move_to(1, ChargeType::Slow).unwrap();
        assert_eq!(ticket.queue_number, "S2");
        assert_eq!(queue.snapshot(Some(ChargeType::Slow)), vec![2, 1]);
        assert!(queue.snapshot(Some(ChargeType::Fast)).is_empty());
        assert_eq!(queue.total_size(), 2);

        assert!(matches!(
            queue.move_to(7, ChargeType::Fast),
            Err(DomainError::NotFound { .. })
        ));
    }

    #[test]
    fn rebuild_restores_order_and_counters() {
        // Persisted picture: F1 finished, F2 and F3 still queued, S1 queued.
        // The input is listed out of order to exercise the creation-time sort.
        let mut finished = sample_request(1, ChargeType::Fast, "F1", 0);
        finished.status = RequestStatus::Completed;
        let f2 = sample_request(2, ChargeType::Fast, "F2", 10);
        let f3 = sample_request(3, ChargeType::Fast, "F3", 20);
        let s1 = sample_request(4, ChargeType::Slow, "S1", 5);
        let requests = vec![finished, f3, f2, s1];

        let queue = WaitingQueue::new(None);
        queue.rebuild(&requests);

        assert_eq!(queue.snapshot(Some(ChargeType::Fast)), vec![2, 3]);
        assert_eq!(queue.snapshot(Some(ChargeType::Slow)), vec![4]);

        // Counters resume above the highest persisted number.
        let next = queue.enqueue(9, ChargeType::Fast).unwrap();
        assert_eq!(next.queue_number, "F4");
        let next = queue.enqueue(10, ChargeType::Slow).unwrap();
        assert_eq!(next.queue_number, "S2");
    }
}
