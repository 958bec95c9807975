//! Scripted in-memory producer.
//!
//! Deterministic chunk producer for integration tests and demos: yields a
//! fixed sequence of deltas, optionally pausing before each one, optionally
//! failing at a chosen point. No network, no clock dependence beyond the
//! optional delay.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::CancelToken;

use super::{ChunkProducer, ChunkSource, ProducerYield, StreamRequest};

/// Configurable scripted producer
///
/// Cloned into a fresh [`ScriptedSource`] on every `open`, so one registered
/// producer can serve any number of streams with identical behavior.
#[derive(Clone, Debug)]
pub struct ScriptedProducer {
    backend_id: String,
    deltas: Vec<String>,
    delay: Option<Duration>,
    fail_after: Option<usize>,
    failure_message: String,
    open_failure: Option<String>,
    healthy: bool,
}

impl ScriptedProducer {
    /// Create a producer with an empty script
    pub fn new(backend_id: impl Into<String>) -> Self {
        Self {
            backend_id: backend_id.into(),
            deltas: Vec::new(),
            delay: None,
            fail_after: None,
            failure_message: "scripted backend failure".to_string(),
            open_failure: None,
            healthy: true,
        }
    }

    /// Set the sequence of deltas to yield
    #[must_use]
    pub fn with_deltas<I, S>(mut self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deltas = deltas.into_iter().map(Into::into).collect();
        self
    }

    /// Pause this long before yielding each delta
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the pull after this many successful yields
    #[must_use]
    pub fn fail_after(mut self, yields: usize) -> Self {
        self.fail_after = Some(yields);
        self
    }

    /// Message carried by the scripted failure
    #[must_use]
    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }

    /// Make `open` itself fail with this message
    #[must_use]
    pub fn with_open_failure(mut self, message: impl Into<String>) -> Self {
        self.open_failure = Some(message.into());
        self
    }

    /// Control the health-check answer
    #[must_use]
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }
}

#[async_trait]
impl ChunkProducer for ScriptedProducer {
    fn backend(&self) -> &str {
        &self.backend_id
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    async fn open(
        &self,
        _request: &StreamRequest,
        cancel: CancelToken,
    ) -> anyhow::Result<Box<dyn ChunkSource>> {
        if let Some(message) = &self.open_failure {
            anyhow::bail!("{message}");
        }
        Ok(Box::new(ScriptedSource {
            deltas: self.deltas.iter().cloned().collect(),
            delay: self.delay,
            fail_after: self.fail_after,
            failure_message: self.failure_message.clone(),
            yielded: 0,
            cancel,
        }))
    }
}

/// Per-stream session over a scripted delta sequence
#[derive(Debug)]
pub struct ScriptedSource {
    deltas: VecDeque<String>,
    delay: Option<Duration>,
    fail_after: Option<usize>,
    failure_message: String,
    yielded: usize,
    cancel: CancelToken,
}

#[async_trait]
impl ChunkSource for ScriptedSource {
    async fn next_chunk(&mut self) -> anyhow::Result<ProducerYield> {
        if self.cancel.is_cancelled() {
            return Ok(ProducerYield::Exhausted);
        }
        if let Some(limit) = self.fail_after {
            if self.yielded >= limit {
                anyhow::bail!("{}", self.failure_message);
            }
        }
        if self.deltas.is_empty() {
            return Ok(ProducerYield::Exhausted);
        }
        // Sleep before taking the delta: dropping this future mid-wait must
        // not consume a script entry.
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            if self.cancel.is_cancelled() {
                return Ok(ProducerYield::Exhausted);
            }
        }
        let Some(delta) = self.deltas.pop_front() else {
            return Ok(ProducerYield::Exhausted);
        };
        self.yielded += 1;
        Ok(ProducerYield::Delta(delta))
    }
}
