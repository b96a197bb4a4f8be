//! [`BoundedQueue`]: the per-host work buffer.
//!
//! Grounded on the teacher's `message_router::router` construction, which
//! wires an `mpsc` channel plus a `tokio::sync::Semaphore` for bounded,
//! backpressured delivery; generalized here from that one fixed discipline
//! to the four the runtime needs (FIFO/LIFO/priority/unordered) and the four
//! overflow policies, behind one trait so a [`crate::host::Host`] does not
//! care which backing structure its queue uses.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::domain::MessageEnvelope;

/// Dequeue order a [`BoundedQueue`] honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    /// First in, first out.
    #[default]
    Fifo,
    /// Last in, first out.
    Lifo,
    /// Lowest `priority` value first; ties broken by enqueue order.
    Priority,
    /// No ordering guarantee; may use the fastest available structure.
    Unordered,
}

/// What happens when `put` is called on a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Suspend the caller until space exists or the queue closes.
    #[default]
    Block,
    /// Evict the discipline's current victim to make room.
    DropOldest,
    /// Discard the incoming envelope.
    DropNew,
    /// Fail the `put` call with [`QueueError::Overflow`].
    Reject,
}

/// Errors raised by [`BoundedQueue`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// `put` was called after `close`.
    #[error("queue is closed")]
    Closed,
    /// `put` failed because the queue is full and the policy is `reject`.
    #[error("queue is full (capacity {capacity})")]
    Overflow {
        /// The queue's configured capacity.
        capacity: usize,
    },
    /// The caller's scope was cancelled while suspended in `put`/`get`.
    #[error("operation cancelled")]
    Cancelled,
}

/// Outcome of a successful `put` under `drop_oldest`/`drop_new`, so the
/// caller can write the overflow trace row the spec requires.
#[derive(Debug, Clone)]
pub enum PutOutcome {
    /// The envelope was enqueued without eviction.
    Enqueued,
    /// The envelope was enqueued after evicting `victim`.
    EnqueuedEvicting {
        /// The envelope removed from the queue to make room.
        victim: Box<MessageEnvelope>,
    },
    /// The envelope itself was discarded instead of being enqueued.
    Discarded,
}

impl PartialEq for PutOutcome {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Self::Enqueued, Self::Enqueued)
                | (Self::EnqueuedEvicting { .. }, Self::EnqueuedEvicting { .. })
                | (Self::Discarded, Self::Discarded)
        )
    }
}

struct PriorityEntry {
    seq: u64,
    priority: u8,
    envelope: MessageEnvelope,
}

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for PriorityEntry {}
impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; we want lowest priority value (and
        // earliest sequence) to come out first, so reverse both.
        (Reverse(self.priority), Reverse(self.seq)).cmp(&(Reverse(other.priority), Reverse(other.seq)))
    }
}

enum Backing {
    Deque(VecDeque<MessageEnvelope>),
    Heap(BinaryHeap<PriorityEntry>),
}

struct Inner {
    backing: Backing,
    discipline: Discipline,
    closed: bool,
}

impl Inner {
    fn len(&self) -> usize {
        match &self.backing {
            Backing::Deque(d) => d.len(),
            Backing::Heap(h) => h.len(),
        }
    }

    fn push(&mut self, envelope: MessageEnvelope, seq: u64) {
        match &mut self.backing {
            Backing::Deque(d) => match self.discipline {
                Discipline::Fifo | Discipline::Unordered => d.push_back(envelope),
                Discipline::Lifo => d.push_front(envelope),
                Discipline::Priority => unreachable!("priority uses Backing::Heap"),
            },
            Backing::Heap(h) => {
                let priority = envelope.priority.as_u8();
                h.push(PriorityEntry {
                    seq,
                    priority,
                    envelope,
                });
            }
        }
    }

    fn pop_front_victim(&mut self) -> Option<MessageEnvelope> {
        match &mut self.backing {
            Backing::Deque(d) => d.pop_front(),
            Backing::Heap(h) => h.pop().map(|e| e.envelope),
        }
    }

    fn pop(&mut self) -> Option<MessageEnvelope> {
        match &mut self.backing {
            Backing::Deque(d) => match self.discipline {
                Discipline::Fifo | Discipline::Unordered | Discipline::Lifo => d.pop_front(),
                Discipline::Priority => unreachable!("priority uses Backing::Heap"),
            },
            Backing::Heap(h) => h.pop().map(|e| e.envelope),
        }
    }
}

/// A bounded, concurrency-safe work buffer, one per host.
///
/// Safe to share behind an `Arc` and call `put`/`get` from many tasks at
/// once: all mutation goes through an internal `tokio::sync::Mutex`, and
/// waiters are woken via `tokio::sync::Notify` rather than polling.
pub struct BoundedQueue {
    capacity: usize,
    overflow: OverflowPolicy,
    inner: Mutex<Inner>,
    not_full: Notify,
    not_empty: Notify,
    sequence: AtomicU64,
}

impl BoundedQueue {
    /// Builds a new queue with the given capacity, discipline and overflow
    /// policy.
    #[must_use]
    pub fn new(capacity: usize, discipline: Discipline, overflow: OverflowPolicy) -> Arc<Self> {
        let backing = if discipline == Discipline::Priority {
            Backing::Heap(BinaryHeap::new())
        } else {
            Backing::Deque(VecDeque::new())
        };
        Arc::new(Self {
            capacity,
            overflow,
            inner: Mutex::new(Inner {
                backing,
                discipline,
                closed: false,
            }),
            not_full: Notify::new(),
            not_empty: Notify::new(),
            sequence: AtomicU64::new(0),
        })
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of buffered envelopes.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// True if the queue currently holds no envelopes.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stops accepting new `put` calls; `get` continues to drain whatever
    /// remains until the queue is empty, at which point it returns
    /// [`QueueError::Closed`].
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Closes the queue and returns everything still buffered, in whatever
    /// order the discipline would have yielded it — used for graceful stop.
    pub async fn drain(&self) -> Vec<MessageEnvelope> {
        let mut guard = self.inner.lock().await;
        guard.closed = true;
        let mut out = Vec::new();
        while let Some(e) = guard.pop() {
            out.push(e);
        }
        out
    }

    /// Adds one envelope, honoring the configured overflow policy.
    ///
    /// Under `Block`, suspends until space exists or the queue closes.
    /// Cancellation of the calling future drops this call cleanly: nothing
    /// is consumed or produced.
    pub async fn put(&self, envelope: MessageEnvelope) -> Result<PutOutcome, QueueError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        loop {
            let mut guard = self.inner.lock().await;
            if guard.closed {
                return Err(QueueError::Closed);
            }
            if guard.len() < self.capacity {
                guard.push(envelope, seq);
                drop(guard);
                self.not_empty.notify_one();
                return Ok(PutOutcome::Enqueued);
            }
            match self.overflow {
                OverflowPolicy::Reject => {
                    return Err(QueueError::Overflow {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::DropNew => {
                    return Ok(PutOutcome::Discarded);
                }
                OverflowPolicy::DropOldest => {
                    let victim = guard.pop_front_victim();
                    guard.push(envelope, seq);
                    drop(guard);
                    self.not_empty.notify_one();
                    return Ok(match victim {
                        Some(victim) => PutOutcome::EnqueuedEvicting {
                            victim: Box::new(victim),
                        },
                        None => PutOutcome::Enqueued,
                    });
                }
                OverflowPolicy::Block => {
                    drop(guard);
                    self.not_full.notified().await;
                }
            }
        }
    }

    /// Removes one envelope per the configured discipline.
    ///
    /// Suspends until one is available or the queue is closed and empty.
    pub async fn get(&self) -> Result<MessageEnvelope, QueueError> {
        loop {
            let mut guard = self.inner.lock().await;
            if let Some(envelope) = guard.pop() {
                drop(guard);
                self.not_full.notify_one();
                return Ok(envelope);
            }
            if guard.closed {
                return Err(QueueError::Closed);
            }
            drop(guard);
            self.not_empty.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageEnvelope;

    fn envelope(priority: u8) -> MessageEnvelope {
        let mut e = MessageEnvelope::new_inbound("application/octet-stream", "1.0", vec![]);
        e.priority = crate::domain::Priority::try_new(priority).unwrap();
        e
    }

    #[tokio::test]
    async fn fifo_preserves_enqueue_order() {
        let q = BoundedQueue::new(4, Discipline::Fifo, OverflowPolicy::Block);
        for i in 0..3 {
            q.put(envelope(i)).await.unwrap();
        }
        let first = q.get().await.unwrap();
        assert_eq!(first.priority.as_u8(), 0);
    }

    #[tokio::test]
    async fn lifo_returns_most_recent_first() {
        let q = BoundedQueue::new(4, Discipline::Lifo, OverflowPolicy::Block);
        for i in 0..3 {
            q.put(envelope(i)).await.unwrap();
        }
        let first = q.get().await.unwrap();
        assert_eq!(first.priority.as_u8(), 2);
    }

    #[tokio::test]
    async fn priority_orders_lowest_value_first() {
        let q = BoundedQueue::new(4, Discipline::Priority, OverflowPolicy::Block);
        q.put(envelope(5)).await.unwrap();
        q.put(envelope(1)).await.unwrap();
        q.put(envelope(3)).await.unwrap();
        assert_eq!(q.get().await.unwrap().priority.as_u8(), 1);
        assert_eq!(q.get().await.unwrap().priority.as_u8(), 3);
        assert_eq!(q.get().await.unwrap().priority.as_u8(), 5);
    }

    #[tokio::test]
    async fn reject_policy_errors_at_capacity() {
        let q = BoundedQueue::new(1, Discipline::Fifo, OverflowPolicy::Reject);
        q.put(envelope(0)).await.unwrap();
        let err = q.put(envelope(1)).await.unwrap_err();
        assert_eq!(err, QueueError::Overflow { capacity: 1 });
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn drop_new_discards_incoming_at_capacity() {
        let q = BoundedQueue::new(1, Discipline::Fifo, OverflowPolicy::DropNew);
        q.put(envelope(0)).await.unwrap();
        let outcome = q.put(envelope(1)).await.unwrap();
        assert_eq!(outcome, PutOutcome::Discarded);
        assert_eq!(q.get().await.unwrap().priority.as_u8(), 0);
    }

    #[tokio::test]
    async fn drop_oldest_evicts_current_head() {
        let q = BoundedQueue::new(1, Discipline::Fifo, OverflowPolicy::DropOldest);
        q.put(envelope(0)).await.unwrap();
        let outcome = q.put(envelope(1)).await.unwrap();
        assert!(matches!(outcome, PutOutcome::EnqueuedEvicting { .. }));
        assert_eq!(q.get().await.unwrap().priority.as_u8(), 1);
    }

    #[tokio::test]
    async fn put_after_close_is_rejected() {
        let q = BoundedQueue::new(4, Discipline::Fifo, OverflowPolicy::Block);
        q.close().await;
        let err = q.put(envelope(0)).await.unwrap_err();
        assert_eq!(err, QueueError::Closed);
    }

    #[tokio::test]
    async fn get_drains_remainder_after_close() {
        let q = BoundedQueue::new(4, Discipline::Fifo, OverflowPolicy::Block);
        q.put(envelope(0)).await.unwrap();
        q.close().await;
        assert!(q.get().await.is_ok());
        assert_eq!(q.get().await.unwrap_err(), QueueError::Closed);
    }

    #[tokio::test]
    async fn len_never_exceeds_capacity_under_block() {
        let q = BoundedQueue::new(2, Discipline::Fifo, OverflowPolicy::Block);
        q.put(envelope(0)).await.unwrap();
        q.put(envelope(1)).await.unwrap();
        assert!(q.len().await <= q.capacity());
    }
}
