//! Bounded priority queue shared by callers and workers.
//!
//! Lower priority values are dequeued first; equal priorities come out in
//! enqueue order. Pushing never blocks: a full queue rejects immediately.
//! Popping suspends until an item arrives or the queue is closed, and a
//! closed queue still hands out whatever was already accepted.

pub mod handle;

pub use handle::{promise, Completer, RequestResult, ResultHandle};

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::http_client::RequestDescriptor;
use crate::rate_limit::EndpointKey;

/// A request waiting for a worker.
#[derive(Debug)]
pub struct QueuedRequest {
    pub descriptor: RequestDescriptor,
    pub endpoint: EndpointKey,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub completer: Completer,
}

/// Why an item was not accepted. The item is handed back.
#[derive(Debug)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

struct Entry<T> {
    priority: i32,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // BinaryHeap is a max-heap; invert so the smallest (priority, seq) is on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
    closed: bool,
}

pub struct RequestQueue<T = QueuedRequest> {
    inner: Mutex<Inner<T>>,
    available: Notify,
    capacity: usize,
}

impl<T> RequestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Notify::new(),
            capacity,
        }
    }

    /// Add an item, or hand it back if the queue is full or closed.
    pub async fn push(&self, priority: i32, item: T) -> Result<(), PushError<T>> {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(PushError::Closed(item));
            }
            if inner.heap.len() >= self.capacity {
                return Err(PushError::Full(item));
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Entry {
                priority,
                seq,
                item,
            });
        }
        self.available.notify_one();
        Ok(())
    }

    /// Take the next item. Returns `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<T> {
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if let Some(entry) = inner.heap.pop() {
                    return Some(entry.item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting items and wake every idle consumer.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.available.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.heap.is_empty()
    }

    pub async fn is_full(&self) -> bool {
        self.inner.lock().await.heap.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
