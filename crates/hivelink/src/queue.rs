//! Inbound message queue.
//!
//! Decouples the delivery context (the broker client's event loop, possibly
//! on another thread) from the consumer (correlator or listen loop). The
//! delivery side only appends; all filtering happens on the consuming side.

use crate::error::{HivelinkError, HivelinkResult, TimeoutKind};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// One message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEntry {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

impl InboundEntry {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }
}

/// Outcome of a bounded [`QueueSender::push_within`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue stayed full for the whole wait
    Dropped,
    /// The consuming side is gone
    Closed,
}

/// Delivery-side handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<InboundEntry>,
}

impl QueueSender {
    /// Append, waiting for room when the queue is full.
    /// Returns `false` if the consuming side is gone.
    pub async fn push(&self, entry: InboundEntry) -> bool {
        self.tx.send(entry).await.is_ok()
    }

    /// Append, waiting at most `wait` for room. A queue that stays full
    /// drops the entry.
    pub async fn push_within(&self, entry: InboundEntry, wait: Duration) -> Delivery {
        let topic = entry.topic.clone();
        let payload_len = entry.payload.len();
        match tokio::time::timeout(wait, self.tx.send(entry)).await {
            Ok(Ok(())) => Delivery::Queued,
            Ok(Err(_)) => Delivery::Closed,
            Err(_) => {
                warn!(
                    topic = %topic,
                    payload_len,
                    wait_ms = wait.as_millis() as u64,
                    "Inbound queue stayed full, dropping message"
                );
                Delivery::Dropped
            }
        }
    }

    /// Append without waiting. A full queue drops the entry.
    pub fn try_push(&self, entry: InboundEntry) -> bool {
        match self.tx.try_send(entry) {
            Ok(()) => true,
            Err(TrySendError::Full(entry)) => {
                warn!(
                    topic = %entry.topic,
                    payload_len = entry.payload.len(),
                    "Inbound queue full, dropping message"
                );
                false
            }
            Err(TrySendError::Closed(entry)) => {
                debug!(topic = %entry.topic, "Inbound queue closed, dropping message");
                false
            }
        }
    }

    /// Append from a thread that is not driven by the async runtime.
    ///
    /// Panics if called from within an async context.
    pub fn blocking_push(&self, entry: InboundEntry) -> bool {
        self.tx.blocking_send(entry).is_ok()
    }
}

/// Consuming side of a bounded FIFO of inbound entries.
#[derive(Debug)]
pub struct InboundQueue {
    rx: Mutex<mpsc::Receiver<InboundEntry>>,
    capacity: usize,
}

impl InboundQueue {
    /// Create a queue holding at most `capacity` undelivered entries.
    pub fn bounded(capacity: usize) -> (QueueSender, InboundQueue) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            QueueSender { tx },
            InboundQueue {
                rx: Mutex::new(rx),
                capacity,
            },
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take exclusive consumer rights until the guard is dropped.
    pub async fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            rx: self.rx.lock().await,
        }
    }

    /// Remove the oldest entry, waiting at most `timeout` (including any
    /// wait for another consumer to release the queue).
    pub async fn take(&self, timeout: Duration) -> HivelinkResult<InboundEntry> {
        let recv = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        match tokio::time::timeout(timeout, recv).await {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => Err(closed()),
            Err(_) => Err(HivelinkError::Timeout(TimeoutKind::Queue(timeout))),
        }
    }
}

/// Exclusive consumer access to an [`InboundQueue`].
pub struct QueueGuard<'a> {
    rx: MutexGuard<'a, mpsc::Receiver<InboundEntry>>,
}

impl QueueGuard<'_> {
    /// Remove the oldest entry, waiting at most `timeout`.
    pub async fn take(&mut self, timeout: Duration) -> HivelinkResult<InboundEntry> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(entry)) => Ok(entry),
            Ok(None) => Err(closed()),
            Err(_) => Err(HivelinkError::Timeout(TimeoutKind::Queue(timeout))),
        }
    }

    /// Remove the oldest entry if one is already waiting.
    pub fn try_take(&mut self) -> Option<InboundEntry> {
        self.rx.try_recv().ok()
    }
}

fn closed() -> HivelinkError {
    HivelinkError::Connection("inbound queue closed: delivery side has shut down".to_string())
}
