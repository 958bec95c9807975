//! Error taxonomy for the streaming pipeline.
//!
//! Every failure is scoped to one stream; nothing in this crate is fatal to
//! the process. Backend failures raised by a producer are wrapped with stream
//! context but the underlying message is preserved verbatim so caller-side
//! retry policy can classify it.

use std::time::Duration;

use thiserror::Error;

use crate::chunk::StreamId;

/// Errors surfaced by the streaming pipeline
///
/// Cloneable so the same error can be recorded on the stream's registry
/// entry and handed to the consumer's in-flight `consume()` call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// No registered producer capability matches the requested backend.
    ///
    /// Raised synchronously by stream creation; the stream is never
    /// registered on this path.
    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),

    /// The handle's consumption sequence was already taken.
    #[error("{0} has already been consumed")]
    AlreadyConsumed(StreamId),

    /// The request descriptor failed validation before registration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Creating another stream would exceed the concurrency limit.
    #[error("too many concurrent streams ({current} active, limit {limit})")]
    TooManyStreams {
        /// Streams currently tracked in a non-terminal state
        current: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// The producer stalled past the configured per-chunk deadline.
    #[error("{stream_id}: no chunk produced within {timeout:?}")]
    ChunkTimeout {
        /// Stream that was aborted
        stream_id: StreamId,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// The producer reported a backend failure.
    #[error("{stream_id}: producer failed: {message}")]
    Producer {
        /// Stream the failure belongs to
        stream_id: StreamId,
        /// Backend error chain, preserved verbatim
        message: String,
    },

    /// The stream was cancelled before or during consumption.
    ///
    /// Cancellation is a normal terminal state, not a stream failure; this
    /// variant appears only when a consumer asks for a sequence that a
    /// prior `cancel()` already tore down.
    #[error("{0} was cancelled")]
    Cancelled(StreamId),
}

impl StreamError {
    /// Wrap a backend failure with stream context
    ///
    /// The full error chain is flattened into the message so nothing the
    /// backend reported is lost across the capability boundary.
    #[must_use]
    pub fn producer_failure(stream_id: StreamId, err: &anyhow::Error) -> Self {
        Self::Producer {
            stream_id,
            message: format!("{err:#}"),
        }
    }

    /// Whether this error represents cancellation rather than a failure
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}
