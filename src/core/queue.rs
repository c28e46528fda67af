//! In-memory offline delivery queue.
//!
//! Pending messages flow through a lock-free FIFO of ids. A concurrent ledger
//! records where every live message sits and owns the payload while it is
//! pending or in flight. Failed messages live in their own list behind a single
//! mutex, in the order they failed.
//!
//! Lock order is failed list, then ledger shard. No lock is held across caller
//! code.

use crossbeam_queue::SegQueue;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::message::{now_millis, MessageId, MessageState, NewMessage, QueuedMessage};
use super::retry::RetryPolicy;
use super::store::QueueSnapshot;
use crate::error::{Error, Result};

/// Ledger entry for one live message.
enum Slot {
    Pending { seq: u64, message: QueuedMessage },
    InFlight(QueuedMessage),
    Failed,
}

impl Slot {
    fn state(&self) -> MessageState {
        match self {
            Slot::Pending { .. } => MessageState::Pending,
            Slot::InFlight(_) => MessageState::InFlight,
            Slot::Failed => MessageState::Failed,
        }
    }
}

/// Outbound messages waiting for a send attempt, plus the ones that failed.
pub struct OfflineQueue {
    pending: SegQueue<MessageId>,
    /// Ledger entries in the pending state. `pending` may also hold ids that
    /// were claimed out of turn.
    waiting: AtomicUsize,
    ledger: DashMap<MessageId, Slot>,
    failed: Mutex<Vec<QueuedMessage>>,
    next_id: AtomicU64,
    sequence: AtomicU64,
    delivered: AtomicU64,
    policy: RetryPolicy,
}

impl OfflineQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            pending: SegQueue::new(),
            waiting: AtomicUsize::new(0),
            ledger: DashMap::new(),
            failed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            policy,
        }
    }

    /// Rebuild a queue from persisted state.
    ///
    /// Messages that were in flight when the snapshot was taken come back as
    /// pending, ahead of everything else.
    pub fn from_snapshot(snapshot: QueueSnapshot, policy: RetryPolicy) -> Self {
        let queue = Self::new(policy);

        let highest = snapshot
            .pending
            .iter()
            .chain(snapshot.failed.iter())
            .map(|m| m.id)
            .max()
            .unwrap_or(0);
        queue
            .next_id
            .store(snapshot.next_id.max(highest.saturating_add(1)), Ordering::Relaxed);

        for mut message in snapshot.pending {
            if queue.ledger.contains_key(&message.id) {
                tracing::warn!("Dropping duplicate message {} from snapshot", message.id);
                continue;
            }
            message.failed = false;
            queue.push_pending(message);
        }

        {
            let mut failed = queue.failed.lock();
            for mut message in snapshot.failed {
                if queue.ledger.contains_key(&message.id) {
                    tracing::warn!("Dropping duplicate message {} from snapshot", message.id);
                    continue;
                }
                message.failed = true;
                queue.ledger.insert(message.id, Slot::Failed);
                failed.push(message);
            }
        }

        tracing::debug!(
            "Restored queue: {} pending, {} failed",
            queue.queue_size(),
            queue.failed_message_count()
        );
        queue
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Enqueue a plain message at the tail of the pending sequence.
    pub fn add_message(&self, address: impl Into<String>, body: impl Into<String>) -> QueuedMessage {
        self.enqueue(NewMessage::new(address, body))
    }

    /// Enqueue a message with metadata at the tail of the pending sequence.
    pub fn enqueue(&self, new: NewMessage) -> QueuedMessage {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = QueuedMessage::from_new(id, new);

        self.push_pending(message.clone());
        tracing::debug!("Enqueued message {} for {}", id, message.address);

        message
    }

    fn push_pending(&self, message: QueuedMessage) {
        let id = message.id;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);

        // The ledger entry must exist before the id becomes visible to consumers.
        self.waiting.fetch_add(1, Ordering::AcqRel);
        self.ledger.insert(id, Slot::Pending { seq, message });
        self.pending.push(id);
    }

    /// Take the head of the pending sequence without blocking.
    ///
    /// The message stays tracked as in flight until it is reported through
    /// [`mark_message_sent`](Self::mark_message_sent) or
    /// [`mark_message_failed`](Self::mark_message_failed).
    pub fn get_next_message(&self) -> Option<QueuedMessage> {
        while let Some(id) = self.pending.pop() {
            if let Some(mut slot) = self.ledger.get_mut(&id) {
                if let Slot::Pending { message, .. } = &mut *slot {
                    message.last_attempt_at = Some(now_millis());
                    let handed_out = message.clone();
                    *slot = Slot::InFlight(handed_out.clone());
                    self.waiting.fetch_sub(1, Ordering::AcqRel);
                    return Some(handed_out);
                }
            }
            tracing::debug!("Skipping claimed pending entry {}", id);
        }

        None
    }

    /// Take one pending message out of turn and mark it in flight.
    ///
    /// Used to record the outcome of a send that was made from an earlier copy
    /// of this queue, where the message was already handed out. Its id stays in
    /// the pending sequence and is skipped by [`get_next_message`](Self::get_next_message).
    pub fn claim(&self, id: MessageId) -> Result<QueuedMessage> {
        let Some(mut slot) = self.ledger.get_mut(&id) else {
            return Err(Error::NotFound(id));
        };

        let Slot::Pending { message, .. } = &*slot else {
            return Err(Error::InvalidTransition {
                id,
                from: slot.state(),
                to: MessageState::InFlight,
            });
        };

        let claimed = message.clone();
        *slot = Slot::InFlight(claimed.clone());
        self.waiting.fetch_sub(1, Ordering::AcqRel);
        Ok(claimed)
    }

    /// Report a failed send attempt.
    pub fn mark_message_failed(&self, message: QueuedMessage) -> Result<()> {
        self.record_failure(message, None)
    }

    /// Report a failed send attempt along with its reason.
    pub fn mark_message_failed_with_error(
        &self,
        message: QueuedMessage,
        error: impl Into<String>,
    ) -> Result<()> {
        self.record_failure(message, Some(error.into()))
    }

    fn record_failure(&self, mut message: QueuedMessage, error: Option<String>) -> Result<()> {
        let mut failed = self.failed.lock();
        self.leave_in_flight(message.id, MessageState::Failed)?;

        message.failed = true;
        message.last_error = error;
        tracing::warn!(
            "Message {} to {} failed (retries so far: {}): {}",
            message.id,
            message.address,
            message.retry_count,
            message.last_error.as_deref().unwrap_or("no reason given")
        );
        failed.push(message);

        Ok(())
    }

    /// Report a successful send. The queue stops tracking the message.
    pub fn mark_message_sent(&self, message: QueuedMessage) -> Result<()> {
        self.leave_in_flight(message.id, MessageState::Delivered)?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Message {} delivered to {}", message.id, message.address);
        Ok(())
    }

    fn leave_in_flight(&self, id: MessageId, to: MessageState) -> Result<()> {
        match self.ledger.entry(id) {
            Entry::Occupied(mut entry) => {
                let from = entry.get().state();
                if from != MessageState::InFlight {
                    return Err(Error::InvalidTransition { id, from, to });
                }
                if to == MessageState::Failed {
                    entry.insert(Slot::Failed);
                } else {
                    entry.remove();
                }
                Ok(())
            }
            Entry::Vacant(_) => Err(Error::NotFound(id)),
        }
    }

    /// Copy of the failed set, oldest failure first.
    pub fn get_failed_messages(&self) -> Vec<QueuedMessage> {
        self.failed.lock().clone()
    }

    /// Move a failed message back to the pending tail.
    ///
    /// Returns `false` without touching anything when the id is not in the
    /// failed set or the retry cap has been reached.
    pub fn retry_failed_message(&self, id: MessageId) -> bool {
        match self.try_retry_failed_message(id) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Retry of message {} refused: {}", id, e);
                false
            }
        }
    }

    /// Like [`retry_failed_message`](Self::retry_failed_message), with the reason
    /// for a refusal.
    pub fn try_retry_failed_message(&self, id: MessageId) -> Result<QueuedMessage> {
        let mut failed = self.failed.lock();

        let index = failed
            .iter()
            .position(|m| m.id == id)
            .ok_or(Error::NotFound(id))?;

        let attempts = failed[index].retry_count;
        if !self.policy.allows_retry(attempts) {
            return Err(Error::RetryLimitExceeded { id, attempts });
        }

        let message = requeue(failed.remove(index));
        self.push_pending(message.clone());
        tracing::info!("Retrying message {} (attempt {})", id, message.retry_count);

        Ok(message)
    }

    /// Move every failed message whose backoff has elapsed back to pending.
    pub fn retry_ready_messages(&self, now_ms: i64) -> usize {
        let mut failed = self.failed.lock();

        let (ready, waiting): (Vec<_>, Vec<_>) = failed
            .drain(..)
            .partition(|m| self.policy.is_ready(m, now_ms));
        *failed = waiting;

        let count = ready.len();
        for message in ready {
            self.push_pending(requeue(message));
        }

        if count > 0 {
            tracing::info!("Requeued {} failed messages", count);
        }
        count
    }

    /// Drop every failed message, returning how many there were.
    pub fn clear_failed_messages(&self) -> usize {
        let mut failed = self.failed.lock();
        let cleared = failed.len();

        for message in failed.drain(..) {
            self.ledger.remove(&message.id);
        }

        if cleared > 0 {
            tracing::info!("Cleared {} failed messages", cleared);
        }
        cleared
    }

    pub fn queue_size(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn failed_message_count(&self) -> usize {
        self.failed.lock().len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.ledger
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::InFlight(_)))
            .count()
    }

    /// Messages reported sent since this instance was created.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn state_of(&self, id: MessageId) -> Option<MessageState> {
        self.ledger.get(&id).map(|slot| slot.state())
    }

    pub fn status(&self) -> QueueStatus {
        let pending = self.queue_size();
        let in_flight = self.in_flight_count();
        let failed = self.failed_message_count();

        QueueStatus {
            pending,
            in_flight,
            failed,
            delivered: self.delivered_count(),
            total: pending + in_flight + failed,
        }
    }

    /// Point-in-time copy of everything the queue tracks.
    pub fn snapshot(&self) -> QueueSnapshot {
        let failed = self.failed.lock();

        let mut in_flight = Vec::new();
        let mut pending = Vec::new();
        for entry in self.ledger.iter() {
            match entry.value() {
                Slot::Pending { seq, message } => pending.push((*seq, message.clone())),
                Slot::InFlight(message) => in_flight.push(message.clone()),
                Slot::Failed => {}
            }
        }

        in_flight.sort_by_key(|m| m.id);
        pending.sort_by_key(|(seq, _)| *seq);

        let mut messages = in_flight;
        messages.extend(pending.into_iter().map(|(_, m)| m));

        QueueSnapshot {
            next_id: self.next_id.load(Ordering::Relaxed),
            pending: messages,
            failed: failed.clone(),
        }
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

fn requeue(mut message: QueuedMessage) -> QueuedMessage {
    message.failed = false;
    message.last_error = None;
    message.retry_count += 1;
    message
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
    pub failed: usize,
    pub delivered: u64,
    pub total: usize,
}

impl QueueStatus {
    pub fn has_messages(&self) -> bool {
        self.total > 0
    }

    pub fn has_failed_messages(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Queue Status:")?;
        writeln!(f, "  Pending:   {}", self.pending)?;
        writeln!(f, "  In flight: {}", self.in_flight)?;
        writeln!(f, "  Failed:    {}", self.failed)?;
        writeln!(f, "  Delivered: {}", self.delivered)?;
        write!(f, "  Total:     {}", self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_single_message_lifecycle() {
        let queue = OfflineQueue::default();

        let msg = queue.add_message("+15551234567", "hi");
        assert_eq!(msg.id, 1);
        assert_eq!(queue.queue_size(), 1);

        let next = queue.get_next_message().unwrap();
        assert_eq!(next.id, 1);
        assert_eq!(queue.queue_size(), 0);

        queue.mark_message_failed(next).unwrap();
        assert_eq!(queue.failed_message_count(), 1);

        assert!(queue.retry_failed_message(1));
        assert_eq!(queue.failed_message_count(), 0);
        assert_eq!(queue.queue_size(), 1);

        let requeued = queue.get_next_message().unwrap();
        assert_eq!(requeued.id, 1);
        assert_eq!(requeued.retry_count, 1);
        assert!(!requeued.failed);
    }

    #[test]
    fn test_retry_unknown_id() {
        let queue = OfflineQueue::default();

        assert!(!queue.retry_failed_message(999));
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.failed_message_count(), 0);
        assert!(matches!(
            queue.try_retry_failed_message(999),
            Err(Error::NotFound(999))
        ));
    }

    #[test]
    fn test_fifo_order() {
        let queue = OfflineQueue::default();
        for i in 0..10 {
            let msg = queue.add_message("555-0100", format!("msg {}", i));
            assert_eq!(msg.retry_count, 0);
            assert!(!msg.failed);
            assert_eq!(queue.queue_size(), i + 1);
        }

        let bodies: Vec<String> = std::iter::from_fn(|| queue.get_next_message())
            .map(|m| m.body)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("msg {}", i)).collect();

        assert_eq!(bodies, expected);
        assert!(queue.get_next_message().is_none());
    }

    #[test]
    fn test_retried_message_goes_to_tail() {
        let queue = OfflineQueue::default();
        queue.add_message("a", "first");
        queue.add_message("b", "second");

        let first = queue.get_next_message().unwrap();
        queue.mark_message_failed(first).unwrap();
        assert!(queue.retry_failed_message(1));

        assert_eq!(queue.get_next_message().unwrap().id, 2);
        assert_eq!(queue.get_next_message().unwrap().id, 1);
    }

    #[test]
    fn test_failed_snapshot_is_a_copy() {
        let queue = OfflineQueue::default();
        queue.add_message("a", "x");
        let msg = queue.get_next_message().unwrap();
        queue.mark_message_failed_with_error(msg, "timeout").unwrap();

        let mut copy = queue.get_failed_messages();
        assert_eq!(copy.len(), 1);
        assert!(copy[0].failed);
        assert_eq!(copy[0].last_error.as_deref(), Some("timeout"));

        copy.clear();
        assert_eq!(queue.failed_message_count(), 1);
    }

    #[test]
    fn test_failing_pending_message_is_rejected() {
        let queue = OfflineQueue::default();
        let msg = queue.add_message("a", "x");

        let err = queue.mark_message_failed(msg).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                id: 1,
                from: MessageState::Pending,
                to: MessageState::Failed
            }
        ));
        assert_eq!(queue.failed_message_count(), 0);
        assert_eq!(queue.queue_size(), 1);
    }

    #[test]
    fn test_double_failure_is_rejected() {
        let queue = OfflineQueue::default();
        queue.add_message("a", "x");
        let msg = queue.get_next_message().unwrap();

        queue.mark_message_failed(msg.clone()).unwrap();
        assert!(queue.mark_message_failed(msg).is_err());
        assert_eq!(queue.failed_message_count(), 1);
    }

    #[test]
    fn test_mark_sent_forgets_message() {
        let queue = OfflineQueue::default();
        queue.add_message("a", "x");
        let msg = queue.get_next_message().unwrap();
        assert_eq!(queue.state_of(1), Some(MessageState::InFlight));
        assert_eq!(queue.in_flight_count(), 1);

        queue.mark_message_sent(msg.clone()).unwrap();
        assert_eq!(queue.state_of(1), None);
        assert_eq!(queue.delivered_count(), 1);
        assert!(matches!(
            queue.mark_message_sent(msg),
            Err(Error::NotFound(1))
        ));
    }

    #[test]
    fn test_retry_cap() {
        let queue = OfflineQueue::new(RetryPolicy::unbounded().with_max_retries(2));
        queue.add_message("a", "x");

        for _ in 0..2 {
            let msg = queue.get_next_message().unwrap();
            queue.mark_message_failed(msg).unwrap();
            assert!(queue.retry_failed_message(1));
        }

        let msg = queue.get_next_message().unwrap();
        assert_eq!(msg.retry_count, 2);
        queue.mark_message_failed(msg).unwrap();

        assert!(!queue.retry_failed_message(1));
        assert!(matches!(
            queue.try_retry_failed_message(1),
            Err(Error::RetryLimitExceeded { id: 1, attempts: 2 })
        ));
        assert_eq!(queue.failed_message_count(), 1);
        assert_eq!(queue.queue_size(), 0);
    }

    #[test]
    fn test_clear_failed_messages() {
        let queue = OfflineQueue::default();
        for _ in 0..3 {
            queue.add_message("a", "x");
        }
        while let Some(msg) = queue.get_next_message() {
            queue.mark_message_failed(msg).unwrap();
        }

        assert_eq!(queue.clear_failed_messages(), 3);
        assert_eq!(queue.failed_message_count(), 0);
        assert_eq!(queue.clear_failed_messages(), 0);
        assert_eq!(queue.state_of(1), None);
    }

    #[test]
    fn test_retry_ready_messages_honours_backoff() {
        let policy = RetryPolicy::unbounded()
            .with_delays(Duration::from_millis(1_000), Duration::from_millis(10_000));
        let queue = OfflineQueue::new(policy);
        queue.add_message("a", "x");
        let msg = queue.get_next_message().unwrap();
        let attempted_at = msg.last_attempt_at.unwrap();
        queue.mark_message_failed(msg).unwrap();

        assert_eq!(queue.retry_ready_messages(attempted_at + 10), 0);
        assert_eq!(queue.failed_message_count(), 1);

        assert_eq!(queue.retry_ready_messages(attempted_at + 1_000), 1);
        assert_eq!(queue.failed_message_count(), 0);
        assert_eq!(queue.get_next_message().unwrap().retry_count, 1);
    }

    #[test]
    fn test_status() {
        let queue = OfflineQueue::default();
        assert!(!queue.status().has_messages());

        queue.add_message("a", "1");
        queue.add_message("a", "2");
        queue.add_message("a", "3");
        let first = queue.get_next_message().unwrap();
        let second = queue.get_next_message().unwrap();
        queue.mark_message_failed(first).unwrap();

        let status = queue.status();
        assert_eq!(status.pending, 1);
        assert_eq!(status.in_flight, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.total, 3);
        assert!(status.has_failed_messages());

        queue.mark_message_sent(second).unwrap();
        assert_eq!(queue.status().delivered, 1);
        assert!(queue.status().to_string().contains("Failed:    1"));
    }

    #[test]
    fn test_snapshot_restore() {
        let queue = OfflineQueue::default();
        queue.add_message("a", "1");
        queue.add_message("a", "2");
        queue.add_message("a", "3");
        queue.add_message("a", "4");

        let failed = queue.get_next_message().unwrap();
        queue.mark_message_failed_with_error(failed, "no signal").unwrap();
        let _in_flight = queue.get_next_message().unwrap();

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.next_id, 5);

        let restored = OfflineQueue::from_snapshot(snapshot, RetryPolicy::default());
        assert_eq!(restored.queue_size(), 3);
        assert_eq!(restored.failed_message_count(), 1);
        assert_eq!(restored.state_of(1), Some(MessageState::Failed));

        let order: Vec<MessageId> = std::iter::from_fn(|| restored.get_next_message())
            .map(|m| m.id)
            .collect();
        assert_eq!(order, vec![2, 3, 4]);

        assert_eq!(restored.add_message("a", "5").id, 5);
        assert!(restored.retry_failed_message(1));
    }

    #[test]
    fn test_sending_a_pending_message_is_rejected() {
        let queue = OfflineQueue::default();
        let msg = queue.add_message("a", "x");

        assert!(matches!(
            queue.mark_message_sent(msg),
            Err(Error::InvalidTransition {
                id: 1,
                from: MessageState::Pending,
                to: MessageState::Delivered,
            })
        ));
        assert_eq!(queue.state_of(1), Some(MessageState::Pending));
    }

    #[test]
    fn test_claim_out_of_turn() {
        let queue = OfflineQueue::default();
        queue.add_message("a", "1");
        queue.add_message("a", "2");
        queue.add_message("a", "3");

        let claimed = queue.claim(2).unwrap();
        assert_eq!(claimed.body, "2");
        assert_eq!(queue.state_of(2), Some(MessageState::InFlight));
        assert_eq!(queue.queue_size(), 2);
        assert_eq!(queue.status().total, 3);

        assert!(matches!(
            queue.claim(2),
            Err(Error::InvalidTransition { from: MessageState::InFlight, .. })
        ));
        assert!(matches!(queue.claim(42), Err(Error::NotFound(42))));

        let order: Vec<MessageId> = std::iter::from_fn(|| queue.get_next_message())
            .map(|m| m.id)
            .collect();
        assert_eq!(order, vec![1, 3]);
        assert_eq!(queue.queue_size(), 0);

        queue.mark_message_failed_with_error(claimed, "busy").unwrap();
        assert_eq!(queue.get_failed_messages()[0].id, 2);
    }

    #[test]
    fn test_claim_settles_a_restored_in_flight_message() {
        let queue = OfflineQueue::default();
        queue.add_message("a", "1");
        queue.add_message("a", "2");
        let in_flight = queue.get_next_message().unwrap();

        let restored = OfflineQueue::from_snapshot(queue.snapshot(), RetryPolicy::default());
        assert_eq!(restored.state_of(in_flight.id), Some(MessageState::Pending));

        let claimed = restored.claim(in_flight.id).unwrap();
        restored.mark_message_sent(claimed).unwrap();

        assert_eq!(restored.queue_size(), 1);
        assert_eq!(restored.get_next_message().unwrap().body, "2");
    }

    #[test]
    fn test_restore_with_highest_possible_id() {
        let mut message = OfflineQueue::default().add_message("a", "x");
        message.id = u64::MAX;
        let snapshot = QueueSnapshot {
            next_id: 1,
            pending: vec![message],
            failed: Vec::new(),
        };

        let restored = OfflineQueue::from_snapshot(snapshot, RetryPolicy::default());
        assert_eq!(restored.queue_size(), 1);
        assert_eq!(restored.get_next_message().unwrap().id, u64::MAX);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let queue = Arc::new(OfflineQueue::default());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.add_message(format!("producer-{}", p), i.to_string());
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        assert_eq!(queue.queue_size(), 1000);

        let mut last_seen = vec![-1i64; 4];
        while let Some(msg) = queue.get_next_message() {
            let producer: usize = msg.address["producer-".len()..].parse().unwrap();
            let n: i64 = msg.body.parse().unwrap();
            assert!(n > last_seen[producer]);
            last_seen[producer] = n;
        }
        assert_eq!(last_seen, vec![249; 4]);
    }

    #[test]
    fn test_concurrent_consumers_take_each_message_once() {
        let queue = Arc::new(OfflineQueue::default());
        for i in 0..2000 {
            queue.add_message("a", i.to_string());
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(msg) = queue.get_next_message() {
                        taken.push(msg.id);
                        queue.mark_message_sent(msg).unwrap();
                    }
                    taken
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in consumers {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "message {} taken twice", id);
            }
        }

        assert_eq!(seen.len(), 2000);
        assert_eq!(queue.delivered_count(), 2000);
        assert_eq!(queue.status().total, 0);
    }
}
