//! Typed lifecycle and chunk events.
//!
//! Every observable transition in the pipeline is published as a
//! [`StreamEvent`] on explicitly registered subscriber channels. There is no
//! global emitter and no stringly-typed topics: subscribers receive the full
//! typed event and filter on [`StreamEventKind`] themselves.
//!
//! Delivery is best-effort: a slow subscriber whose channel is full misses
//! events rather than stalling driver tasks, and a dropped receiver is pruned
//! on the next emission.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::chunk::{ChunkId, StreamId};
use crate::error::StreamError;

/// Default capacity of a subscriber channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Events
// ============================================================================

/// One pipeline event with its origin and emission time
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Stream the event belongs to
    pub stream_id: StreamId,
    /// What happened
    pub kind: StreamEventKind,
    /// When it was emitted
    pub timestamp: Instant,
}

impl StreamEvent {
    /// Create an event stamped with the current time
    #[must_use]
    pub fn new(stream_id: StreamId, kind: StreamEventKind) -> Self {
        Self {
            stream_id,
            kind,
            timestamp: Instant::now(),
        }
    }
}

/// The kinds of event the pipeline publishes
#[derive(Debug, Clone)]
pub enum StreamEventKind {
    /// Stream registered and producer resolved
    Created {
        /// Caller-supplied correlation ID
        request_id: String,
        /// Backend the producer was resolved for
        backend: String,
    },
    /// Consumption began pulling from the producer
    StreamingStarted,
    /// One chunk passed the filter and entered the buffer
    ChunkAccepted {
        /// Chunk identity within the stream
        chunk_id: ChunkId,
        /// Size of the increment in bytes
        delta_bytes: usize,
    },
    /// A batch was released to the consumer
    Flushed {
        /// Number of chunks in the released batch
        batch_size: usize,
    },
    /// Producer exhausted with no error
    Completed {
        /// Chunks produced over the stream's lifetime
        chunk_count: u64,
        /// Time from creation to completion
        duration: Duration,
    },
    /// Stream ended in error
    Failed {
        /// The recorded failure
        error: StreamError,
    },
    /// Stream cancelled by the caller
    Cancelled,
    /// Stream removed from the registry
    Purged,
}

impl StreamEventKind {
    /// Whether this event marks a terminal transition
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Registry of event subscribers
///
/// Concurrent reads (emission) dominate writes (subscription), so the
/// subscriber table sits behind a read/write lock. The lock is never held
/// across an await; `emit` uses `try_send` exclusively.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<mpsc::Sender<StreamEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber with the default channel capacity
    pub fn subscribe(&self) -> mpsc::Receiver<StreamEvent> {
        self.subscribe_with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    /// Register a subscriber with an explicit channel capacity
    pub fn subscribe_with_capacity(&self, capacity: usize) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        let mut subscribers = self.subscribers.write();
        subscribers.push(tx);
        tracing::debug!(subscribers = subscribers.len(), "Event subscriber registered");
        rx
    }

    /// Number of registered subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Publish an event to every subscriber, best-effort
    ///
    /// A full subscriber channel drops this event for that subscriber; a
    /// closed channel marks the subscriber for pruning.
    pub fn emit(&self, event: StreamEvent) {
        let mut saw_closed = false;
        {
            let subscribers = self.subscribers.read();
            for tx in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(
                            stream_id = %event.stream_id,
                            "Subscriber channel full, event dropped for that subscriber"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        saw_closed = true;
                    }
                }
            }
        }

        if saw_closed {
            self.prune_closed();
        }
    }

    fn prune_closed(&self) {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|tx| !tx.is_closed());
        let removed = before - subscribers.len();
        if removed > 0 {
            tracing::debug!(
                removed = removed,
                remaining = subscribers.len(),
                "Pruned closed event subscribers"
            );
        }
    }
}
