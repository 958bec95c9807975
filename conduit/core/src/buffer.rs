//! Buffering policy: batching produced chunks before release.
//!
//! Accepted chunks accumulate in a per-stream buffer and are released to the
//! consumer as one FIFO batch when any trigger fires: chunk count, cumulative
//! byte size, or age of the oldest buffered chunk. This amortizes consumer
//! overhead for bursty producers while `max_wait` bounds worst-case delivery
//! latency and `max_chunks`/`max_bytes` bound worst-case memory growth.
//!
//! With buffering disabled every chunk is released immediately as a batch of
//! one.

use std::time::{Duration, Instant};

use crate::chunk::Chunk;

// ============================================================================
// Configuration
// ============================================================================

/// Flush thresholds for the per-stream chunk buffer
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Whether batching is active at all; when false, flush-per-chunk
    pub enabled: bool,
    /// Flush once this many chunks are buffered
    pub max_chunks: usize,
    /// Flush once buffered text reaches this many bytes (content + delta)
    pub max_bytes: usize,
    /// Flush once the oldest buffered chunk is this old
    pub max_wait: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chunks: 16,
            max_bytes: 32 * 1024,
            max_wait: Duration::from_millis(100),
        }
    }
}

// ============================================================================
// Chunk Buffer
// ============================================================================

/// Per-stream chunk accumulator with threshold-triggered release
///
/// Owned by the stream's driver; this type is deliberately not shared or
/// locked. FIFO order is preserved through every path out of the buffer.
#[derive(Debug)]
pub struct ChunkBuffer {
    config: BufferConfig,
    chunks: Vec<Chunk>,
    byte_size: usize,
    oldest_at: Option<Instant>,
}

impl ChunkBuffer {
    /// Create an empty buffer with the given thresholds
    #[must_use]
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            chunks: Vec::new(),
            byte_size: 0,
            oldest_at: None,
        }
    }

    /// Number of chunks currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the buffer holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Cumulative text bytes currently held
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Accept a chunk; returns the released batch if a trigger fired
    ///
    /// With buffering disabled the chunk comes straight back as a batch of
    /// one and the buffer never holds anything.
    pub fn push(&mut self, chunk: Chunk) -> Option<Vec<Chunk>> {
        if !self.config.enabled {
            return Some(vec![chunk]);
        }

        self.byte_size += chunk.text_size();
        if self.oldest_at.is_none() {
            self.oldest_at = Some(chunk.timestamp);
        }
        self.chunks.push(chunk);

        if self.trigger_fired() {
            Some(self.flush())
        } else {
            None
        }
    }

    /// Whether an age-based flush is due right now
    ///
    /// Count and size triggers are checked inside [`push`](Self::push); this
    /// covers the quiet-producer case where no push arrives to check them.
    #[must_use]
    pub fn flush_due(&self) -> bool {
        self.oldest_age()
            .is_some_and(|age| age >= self.config.max_wait)
    }

    /// Deadline by which the current contents must be flushed
    ///
    /// None while the buffer is empty. The driver parks a timer on this.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.oldest_at.map(|t| t + self.config.max_wait)
    }

    /// Release everything held, in FIFO order
    pub fn flush(&mut self) -> Vec<Chunk> {
        self.byte_size = 0;
        self.oldest_at = None;
        std::mem::take(&mut self.chunks)
    }

    /// Release whatever remains when a stream completes
    ///
    /// Completion is lossless: the producer delivered everything, so the
    /// trailing partial batch is flushed to the consumer before the
    /// completion event rather than dropped.
    pub fn take_residual(&mut self) -> Vec<Chunk> {
        self.flush()
    }

    /// Drop whatever remains when a stream fails or is cancelled
    ///
    /// Fail-fast: the error is surfaced immediately instead of salvaging
    /// partial output. Returns the number of chunks dropped, for logging.
    pub fn discard(&mut self) -> usize {
        let dropped = self.chunks.len();
        self.chunks.clear();
        self.byte_size = 0;
        self.oldest_at = None;
        dropped
    }

    fn trigger_fired(&self) -> bool {
        self.chunks.len() >= self.config.max_chunks
            || self.byte_size >= self.config.max_bytes
            || self.flush_due()
    }

    fn oldest_age(&self) -> Option<Duration> {
        self.oldest_at.map(|t| t.elapsed())
    }
}
