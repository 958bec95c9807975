//! HTTP NDJSON producer.
//!
//! Chunk producer for local model servers speaking newline-delimited JSON
//! over a generate endpoint (the Ollama-style REST shape):
//!
//! - `POST /api/generate` with `{"model", "prompt", "stream": true}`
//! - one JSON object per line, `"response"` carrying the increment
//! - `"done": true` on the final line
//!
//! The response body is consumed incrementally; nothing is buffered beyond
//! the current partial line.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::cancel::CancelToken;

use super::{ChunkProducer, ChunkSource, ProducerYield, StreamRequest};

/// Producer speaking newline-delimited JSON over HTTP
#[derive(Clone)]
pub struct HttpNdjsonProducer {
    /// Backend identifier used as the dispatch key
    backend_id: String,
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl HttpNdjsonProducer {
    /// Create a producer for the given backend identifier and server
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(
        backend_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            backend_id: backend_id.into(),
            host: host.into(),
            port,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .context("building HTTP client")?,
        })
    }

    /// Create from environment variables
    ///
    /// Reads `CONDUIT_HTTP_HOST` and `CONDUIT_HTTP_PORT`, defaulting to
    /// `localhost:11434`.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn from_env(backend_id: impl Into<String>) -> anyhow::Result<Self> {
        let host =
            std::env::var("CONDUIT_HTTP_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("CONDUIT_HTTP_PORT")
            .unwrap_or_else(|_| "11434".to_string())
            .parse()
            .unwrap_or(11434);

        Self::new(backend_id, host, port)
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }
}

#[async_trait]
impl ChunkProducer for HttpNdjsonProducer {
    fn backend(&self) -> &str {
        &self.backend_id
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn open(
        &self,
        request: &StreamRequest,
        cancel: CancelToken,
    ) -> anyhow::Result<Box<dyn ChunkSource>> {
        let body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": true,
        });

        let response = self
            .http_client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .context("sending generate request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {status}: {body}", self.backend_id);
        }

        // Bytes are converted up front so the source never names the body
        // chunk type.
        let bytes = response.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();

        Ok(Box::new(HttpNdjsonSource {
            bytes,
            cancel,
            pending: String::new(),
            done: false,
        }))
    }
}

/// Per-stream session over one in-flight HTTP response
pub struct HttpNdjsonSource {
    bytes: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    cancel: CancelToken,
    /// Undecoded tail of the body, at most one partial line
    pending: String,
    done: bool,
}

#[async_trait]
impl ChunkSource for HttpNdjsonSource {
    async fn next_chunk(&mut self) -> anyhow::Result<ProducerYield> {
        if self.done || self.cancel.is_cancelled() {
            return Ok(ProducerYield::Exhausted);
        }

        loop {
            // Drain complete lines already received.
            while let Some(pos) = self.pending.find('\n') {
                let line: String = self.pending.drain(..=pos).collect();
                let Some(parsed) = parse_generate_line(line.trim()) else {
                    continue;
                };

                if parsed.done {
                    self.done = true;
                }
                match parsed.delta {
                    Some(delta) => return Ok(ProducerYield::Delta(delta)),
                    None if parsed.done => return Ok(ProducerYield::Exhausted),
                    None => continue,
                }
            }

            if self.done {
                return Ok(ProducerYield::Exhausted);
            }

            // One token interval per cancellation check, as the capability
            // contract requires.
            if self.cancel.is_cancelled() {
                return Ok(ProducerYield::Exhausted);
            }

            match self.bytes.next().await {
                Some(Ok(bytes)) => {
                    self.pending.push_str(&String::from_utf8_lossy(&bytes));
                }
                Some(Err(e)) => {
                    return Err(e).context("reading response body");
                }
                None => {
                    // Body ended without a done marker; treat as clean end.
                    self.done = true;
                    return Ok(ProducerYield::Exhausted);
                }
            }
        }
    }
}

struct GenerateLine {
    delta: Option<String>,
    done: bool,
}

/// Parse one NDJSON line from the generate endpoint
///
/// Returns None for blank or malformed lines, which are skipped the same
/// way a lenient client skips keep-alive noise.
fn parse_generate_line(line: &str) -> Option<GenerateLine> {
    if line.is_empty() {
        return None;
    }
    let data: serde_json::Value = serde_json::from_str(line).ok()?;

    let delta = data
        .get("response")
        .and_then(|r| r.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);
    let done = data
        .get("done")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    Some(GenerateLine { delta, done })
}
