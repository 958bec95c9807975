//! Chunk producer capability.
//!
//! Trait definitions for backend chunk producers. This abstraction lets the
//! pipeline pull increments from different generative backends without
//! changing core logic.
//!
//! # Design Philosophy
//!
//! Two seams, both pull-based:
//! - [`ChunkProducer`] is the registered, long-lived capability for one
//!   backend family. Resolving and priming it is part of stream creation.
//! - [`ChunkSource`] is the per-stream session a producer opens. The driver
//!   pulls one increment at a time; suspension points are exactly the awaits
//!   on the backend.
//!
//! A source must observe the [`CancelToken`] it was opened with at least once
//! per produced chunk and stop yielding promptly after it is raised.
//! Implementations handle provider-specific details (wire format, auth).

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::config::LimitsConfig;
use crate::error::StreamError;

pub mod http;
pub mod scripted;

pub use http::HttpNdjsonProducer;
pub use scripted::{ScriptedProducer, ScriptedSource};

// ============================================================================
// Request Descriptor
// ============================================================================

/// Immutable descriptor for one stream request
///
/// A stream is bound to its initial request forever; there are no mid-flight
/// parameter changes.
#[derive(Clone, Debug)]
pub struct StreamRequest {
    /// Backend identifier used to resolve the producer capability
    pub backend: String,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// The prompt to send
    pub prompt: String,
    /// Caller-supplied correlation ID
    pub request_id: String,
}

impl StreamRequest {
    /// Create a request with a generated correlation ID
    pub fn new(
        backend: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
            prompt: prompt.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Set the caller's own correlation ID
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Check the request against configured limits
    ///
    /// # Errors
    ///
    /// Returns `StreamError::InvalidRequest` naming the first violation.
    pub fn validate(&self, limits: &LimitsConfig) -> Result<(), StreamError> {
        if self.model.trim().is_empty() {
            return Err(StreamError::InvalidRequest(
                "model identifier is empty".to_string(),
            ));
        }
        if self.prompt.is_empty() {
            return Err(StreamError::InvalidRequest("prompt is empty".to_string()));
        }
        if self.prompt.len() > limits.max_prompt_bytes {
            return Err(StreamError::InvalidRequest(format!(
                "prompt is {} bytes, limit is {}",
                self.prompt.len(),
                limits.max_prompt_bytes
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Producer Traits
// ============================================================================

/// One pull step's outcome, when it is not a failure
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProducerYield {
    /// Next raw increment of content
    Delta(String),
    /// Clean end of output; no more chunks will come
    Exhausted,
}

/// Registered capability producing chunks for one backend family
///
/// Implement this trait to add support for another backend. Registration is
/// keyed on [`backend`](Self::backend); dispatch never switches on strings
/// outside that single lookup.
#[async_trait]
pub trait ChunkProducer: Send + Sync {
    /// Backend identifier this producer serves (the dispatch key)
    fn backend(&self) -> &str;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;

    /// Open a per-stream chunk source for one request
    ///
    /// Called once during stream creation; this is the priming step. The
    /// returned source must poll `cancel` once per produced chunk.
    ///
    /// # Errors
    ///
    /// Any backend failure; creation fails and nothing stays registered.
    async fn open(
        &self,
        request: &StreamRequest,
        cancel: CancelToken,
    ) -> anyhow::Result<Box<dyn ChunkSource>>;
}

impl std::fmt::Debug for dyn ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChunkSource")
    }
}

/// Per-stream session yielding raw increments
#[async_trait]
pub trait ChunkSource: Send {
    /// Pull the next increment, or learn the stream is done
    ///
    /// The pipeline races this future against flush timers and may drop it
    /// before completion; implementations must not lose an increment when
    /// that happens (keep pending data in `self`, not in the future).
    ///
    /// # Errors
    ///
    /// A backend failure; the pipeline wraps it with stream context and
    /// fails the stream.
    async fn next_chunk(&mut self) -> anyhow::Result<ProducerYield>;
}
