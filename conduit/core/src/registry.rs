//! Stream registry: the authoritative table of streams and their state.
//!
//! The registry exclusively owns every [`StreamRecord`]. Mutation goes
//! through narrow, named operations so the single-writer rules hold: the
//! lifecycle controller drives status transitions, the per-stream driver
//! records chunks and buffer depth, and the cleanup path removes records.
//! External callers only ever see detached [`StreamSnapshot`] copies.
//!
//! No map guard is held across an await anywhere in this module.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::chunk::{Chunk, StreamId};
use crate::error::StreamError;
use crate::provider::{ChunkSource, StreamRequest};

// ============================================================================
// Stream Status
// ============================================================================

/// Lifecycle state of a stream
///
/// `Completed`, `Failed`, and `Cancelled` are terminal; a stream observed in
/// one of them never leaves it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamStatus {
    /// Created, producer capability not yet primed
    Initializing,
    /// Producer primed, consumption not yet started
    Active,
    /// Consumption is pulling from the producer
    Streaming,
    /// Producer exhausted with no error
    Completed,
    /// Producer, filter, or timeout raised
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl StreamStatus {
    /// Whether this status is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the stream is still live
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Active | Self::Streaming)
    }

    /// Whether moving to `next` follows a legal lifecycle edge
    #[must_use]
    pub fn can_transition_to(&self, next: StreamStatus) -> bool {
        match (self, next) {
            (Self::Initializing, Self::Active)
            | (Self::Active, Self::Streaming)
            | (Self::Streaming, Self::Completed)
            | (Self::Streaming, Self::Failed) => true,
            (current, Self::Cancelled) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Status label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Stream Record
// ============================================================================

/// One tracked stream with everything the pipeline knows about it
pub struct StreamRecord {
    /// Stream identity
    pub id: StreamId,
    /// The immutable request this stream is bound to
    pub request: StreamRequest,
    /// Current lifecycle state
    status: StreamStatus,
    /// Creation time, for elapsed measurement
    started_at: Instant,
    /// Creation time, for display in snapshots
    started_at_utc: DateTime<Utc>,
    /// When a terminal state was reached; freezes elapsed
    terminal_at: Option<Instant>,
    /// Every chunk ever produced, in order (introspection only)
    chunks: Vec<Chunk>,
    /// Chunks currently held by the buffering policy
    buffer_depth: usize,
    /// Present only when status is `Failed`
    error: Option<StreamError>,
    /// Cooperative cancellation signal shared with the producer
    cancel: CancelToken,
    /// Primed chunk source; taken exactly once when consumption starts
    source: Mutex<Option<Box<dyn ChunkSource>>>,
    /// Set on first consumption; the consume-once guard of record
    consumed: bool,
}

impl StreamRecord {
    /// Create a record in `Initializing` with its primed source
    #[must_use]
    pub fn new(
        id: StreamId,
        request: StreamRequest,
        source: Box<dyn ChunkSource>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            id,
            request,
            status: StreamStatus::Initializing,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            terminal_at: None,
            chunks: Vec::new(),
            buffer_depth: 0,
            error: None,
            cancel,
            source: Mutex::new(Some(source)),
            consumed: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(id: StreamId, request: StreamRequest, cancel: CancelToken) -> Self {
        Self {
            id,
            request,
            status: StreamStatus::Initializing,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            terminal_at: None,
            chunks: Vec::new(),
            buffer_depth: 0,
            error: None,
            cancel,
            source: Mutex::new(None),
            consumed: false,
        }
    }

    /// Elapsed lifetime, frozen once a terminal state is reached
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self.terminal_at {
            Some(t) => t.saturating_duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }

    /// Detached copy of everything a caller may see
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            id: self.id,
            request_id: self.request.request_id.clone(),
            backend: self.request.backend.clone(),
            model: self.request.model.clone(),
            status: self.status,
            chunk_count: self.chunks.len(),
            buffer_depth: self.buffer_depth,
            error: self.error.as_ref().map(ToString::to_string),
            started_at: self.started_at_utc,
            elapsed: self.elapsed(),
        }
    }
}

/// Read-only view of one stream's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    /// Stream identity
    pub id: StreamId,
    /// Caller-supplied correlation ID
    pub request_id: String,
    /// Backend the stream is bound to
    pub backend: String,
    /// Model the stream is bound to
    pub model: String,
    /// Lifecycle state at snapshot time
    pub status: StreamStatus,
    /// Chunks produced so far
    pub chunk_count: usize,
    /// Chunks currently buffered, not yet released
    pub buffer_depth: usize,
    /// Error message when status is `error`
    pub error: Option<String>,
    /// Creation time
    pub started_at: DateTime<Utc>,
    /// Lifetime so far, frozen at terminal
    pub elapsed: Duration,
}

// ============================================================================
// Stream Registry
// ============================================================================

/// Concurrent table of all tracked streams
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<StreamId, StreamRecord>,
}

impl StreamRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream record
    pub fn insert(&self, record: StreamRecord) {
        let id = record.id;
        self.streams.insert(id, record);
        tracing::debug!(stream_id = %id, "Stream registered");
    }

    /// Remove a stream, dropping its source and cancellation resource
    ///
    /// Returns true if a record was removed.
    pub fn remove(&self, id: &StreamId) -> bool {
        let removed = self.streams.remove(id).is_some();
        if removed {
            tracing::debug!(stream_id = %id, "Stream purged from registry");
        }
        removed
    }

    /// Whether a stream is tracked
    #[must_use]
    pub fn contains(&self, id: &StreamId) -> bool {
        self.streams.contains_key(id)
    }

    /// Number of tracked streams, terminal included
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether nothing is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Number of streams in a non-terminal state
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.streams
            .iter()
            .filter(|entry| entry.status.is_active())
            .count()
    }

    /// Current status of a stream
    #[must_use]
    pub fn status(&self, id: &StreamId) -> Option<StreamStatus> {
        self.streams.get(id).map(|record| record.status)
    }

    /// Detached snapshot of one stream
    #[must_use]
    pub fn snapshot(&self, id: &StreamId) -> Option<StreamSnapshot> {
        self.streams.get(id).map(|record| record.snapshot())
    }

    /// Detached snapshots of every tracked stream, terminal included
    #[must_use]
    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        self.streams
            .iter()
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// Apply a lifecycle transition if it follows a legal edge
    ///
    /// Illegal transitions and unknown streams are logged and left
    /// unchanged. Returns whether the transition was applied.
    pub fn transition(&self, id: &StreamId, next: StreamStatus) -> bool {
        let Some(mut record) = self.streams.get_mut(id) else {
            tracing::warn!(
                stream_id = %id,
                to = %next,
                "Transition on unknown stream ignored"
            );
            return false;
        };

        if !record.status.can_transition_to(next) {
            tracing::warn!(
                stream_id = %id,
                from = %record.status,
                to = %next,
                "Illegal status transition ignored"
            );
            return false;
        }

        tracing::debug!(
            stream_id = %id,
            from = %record.status,
            to = %next,
            "Stream status transition"
        );
        record.status = next;
        if next.is_terminal() && record.terminal_at.is_none() {
            record.terminal_at = Some(Instant::now());
        }
        true
    }

    /// Append a produced chunk and update the mirrored buffer depth
    pub fn record_chunk(&self, id: &StreamId, chunk: Chunk, buffer_depth: usize) {
        if let Some(mut record) = self.streams.get_mut(id) {
            record.chunks.push(chunk);
            record.buffer_depth = buffer_depth;
        }
    }

    /// Update the mirrored buffer depth after a flush or discard
    pub fn set_buffer_depth(&self, id: &StreamId, depth: usize) {
        if let Some(mut record) = self.streams.get_mut(id) {
            record.buffer_depth = depth;
        }
    }

    /// Record the failure that moved a stream to `error`
    pub fn set_error(&self, id: &StreamId, error: StreamError) {
        if let Some(mut record) = self.streams.get_mut(id) {
            record.error = Some(error);
        }
    }

    /// Mark the stream consumed
    ///
    /// Returns `Some(true)` when this call newly marked it, `Some(false)`
    /// when it was already consumed, `None` for an unknown stream.
    pub fn mark_consumed(&self, id: &StreamId) -> Option<bool> {
        self.streams.get_mut(id).map(|mut record| {
            if record.consumed {
                false
            } else {
                record.consumed = true;
                true
            }
        })
    }

    /// Clone the stream's cancellation token
    #[must_use]
    pub fn cancel_token(&self, id: &StreamId) -> Option<CancelToken> {
        self.streams.get(id).map(|record| record.cancel.clone())
    }

    /// Take the primed chunk source out of the record
    ///
    /// Yields the source exactly once; later calls return None.
    pub fn take_source(&self, id: &StreamId) -> Option<Box<dyn ChunkSource>> {
        self.streams
            .get(id)
            .and_then(|record| record.source.lock().take())
    }
}
