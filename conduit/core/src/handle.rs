//! Consumer-facing stream handle and the chunk sequence behind it.
//!
//! A [`StreamHandle`] is what stream creation returns: the caller's only
//! grip on a live stream. Consumption is a one-shot operation that turns the
//! handle into a [`ChunkStream`], the ordered sequence of released batches.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use crate::chunk::{Chunk, StreamId};
use crate::error::StreamError;
use crate::pipeline::{BatchResult, PipelineCore};

// ============================================================================
// Stream Handle
// ============================================================================

/// A caller's grip on one created stream
///
/// The handle does not pull anything by itself; the stream stays idle until
/// [`consume`](Self::consume) is called. Dropping an unconsumed handle leaves
/// the stream registered and active until it is cancelled.
pub struct StreamHandle {
    id: StreamId,
    core: Arc<PipelineCore>,
    consumed: AtomicBool,
}

impl StreamHandle {
    pub(crate) fn new(id: StreamId, core: Arc<PipelineCore>) -> Self {
        Self {
            id,
            core,
            consumed: AtomicBool::new(false),
        }
    }

    /// The stream this handle refers to
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Begin consumption and return the chunk sequence
    ///
    /// Consumption starts the pull loop: the producer is polled, chunks are
    /// filtered and buffered, and batches arrive on the returned sequence.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyConsumed`] on any call after the first, and
    /// [`StreamError::Cancelled`] when the stream was cancelled before
    /// consumption began.
    pub fn consume(&self) -> Result<ChunkStream, StreamError> {
        if self.consumed.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyConsumed(self.id));
        }
        let receiver = self.core.start_consumption(self.id)?;
        Ok(ChunkStream::new(receiver))
    }

    /// Cancel the stream
    ///
    /// Equivalent to cancelling through the pipeline: idempotent, and safe
    /// before, during, or after consumption.
    pub fn cancel(&self) {
        self.core.cancel(self.id);
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("consumed", &self.consumed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Chunk Stream
// ============================================================================

/// The ordered sequence of chunks released by one stream
///
/// Batches preserve production order; a terminal failure arrives as the
/// final `Err` item, after which the sequence ends. A cancelled stream's
/// sequence simply ends with no error item.
#[derive(Debug)]
pub struct ChunkStream {
    receiver: mpsc::Receiver<BatchResult>,
    pending: VecDeque<Chunk>,
}

impl ChunkStream {
    fn new(receiver: mpsc::Receiver<BatchResult>) -> Self {
        Self {
            receiver,
            pending: VecDeque::new(),
        }
    }

    /// Next single chunk, flattening batch boundaries away
    ///
    /// Returns None once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<Chunk, StreamError>> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Some(Ok(chunk));
            }
            match self.receiver.recv().await? {
                Ok(batch) => self.pending.extend(batch),
                Err(err) => return Some(Err(err)),
            }
        }
    }

    /// Next released batch, as the buffer released it
    ///
    /// Chunks already pulled off a batch boundary by [`next`](Self::next)
    /// are returned first as their own batch.
    pub async fn next_batch(&mut self) -> Option<BatchResult> {
        if !self.pending.is_empty() {
            return Some(Ok(self.pending.drain(..).collect()));
        }
        self.receiver.recv().await
    }

    /// Adapt into a [`Stream`] of batch results
    pub fn into_stream(self) -> impl Stream<Item = BatchResult> {
        let head: Option<BatchResult> = if self.pending.is_empty() {
            None
        } else {
            Some(Ok(self.pending.into_iter().collect()))
        };
        tokio_stream::iter(head).chain(ReceiverStream::new(self.receiver))
    }
}
