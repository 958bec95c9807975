//! Stream and chunk identity types.
//!
//! A [`Chunk`] is one incremental unit of produced content. Chunks carry both
//! the cumulative text so far (`content`) and the increment this chunk adds
//! (`delta`), so consumers can render either incrementally or wholesale
//! without re-assembling state themselves.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Stream Identity
// ============================================================================

/// Unique identifier for a stream
///
/// Assigned once at creation and immutable for the lifetime of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Create a new unique stream ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

// ============================================================================
// Chunk Identity
// ============================================================================

/// Identifier for a chunk, unique within its stream
///
/// Chunk IDs are a dense sequence starting at 1, assigned in production
/// order. Comparing two IDs from the same stream therefore also compares
/// production order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(u64);

impl ChunkId {
    /// The ID assigned to the first chunk of a stream
    #[must_use]
    pub fn first() -> Self {
        Self(1)
    }

    /// The ID following this one in the same stream
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw sequence number
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create a chunk ID from a raw sequence number (for testing)
    #[cfg(test)]
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk-{}", self.0)
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// One incremental unit of produced content within a stream
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Identifier, unique within the owning stream
    pub id: ChunkId,
    /// Correlation ID of the request that created the owning stream
    pub request_id: String,
    /// Cumulative text so far, after filtering
    pub content: String,
    /// Incremental text this chunk adds, after filtering
    pub delta: String,
    /// Production time; non-decreasing within a stream
    pub timestamp: Instant,
}

impl Chunk {
    /// Create a chunk stamped with the current time
    #[must_use]
    pub fn new(id: ChunkId, request_id: impl Into<String>, content: String, delta: String) -> Self {
        Self {
            id,
            request_id: request_id.into(),
            content,
            delta,
            timestamp: Instant::now(),
        }
    }

    /// Combined size of both text fields in bytes
    ///
    /// This is the unit the buffering policy measures occupancy in.
    #[must_use]
    pub fn text_size(&self) -> usize {
        self.content.len() + self.delta.len()
    }

    /// Time elapsed since this chunk was produced
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_are_unique() {
        let a = StreamId::new();
        let b = StreamId::new();
        assert_ne!(a, b, "two freshly created stream IDs must differ");
    }

    #[test]
    fn stream_id_display_is_prefixed() {
        let id = StreamId::new();
        assert!(id.to_string().starts_with("stream-"));
    }

    #[test]
    fn chunk_ids_are_ordered_by_sequence() {
        let first = ChunkId::first();
        let second = first.next();
        let third = second.next();

        assert!(first < second);
        assert!(second < third);
        assert_eq!(first.as_u64(), 1);
        assert_eq!(third.as_u64(), 3);
    }

    #[test]
    fn chunk_text_size_counts_both_fields() {
        let chunk = Chunk::new(
            ChunkId::first(),
            "req-1",
            "hello world".to_string(),
            "world".to_string(),
        );
        assert_eq!(chunk.text_size(), 11 + 5);
    }

    #[test]
    fn chunk_timestamps_do_not_decrease() {
        let a = Chunk::new(ChunkId::first(), "req-1", "a".to_string(), "a".to_string());
        let b = Chunk::new(a.id.next(), "req-1", "ab".to_string(), "b".to_string());
        assert!(b.timestamp >= a.timestamp);
    }
}
