//! Conduit Core - Bounded, Cancellable Chunk Streaming
//!
//! This crate is the streaming pipeline behind conduit: it turns the raw
//! incremental output of generative backends into ordered, filtered,
//! batched chunk sequences with full lifecycle tracking. It is completely
//! independent of any transport or UI layer and runs headless in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Consumers                               │
//! │        create_stream() ──► StreamHandle ──► ChunkStream          │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                        STREAM PIPELINE                           │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐  │  │
//! │  │  │ Registry │  │  Filter  │  │  Buffer  │  │  Metrics   │  │  │
//! │  │  │ (status) │  │ (redact) │  │ (batch)  │  │  / Events  │  │  │
//! │  │  └──────────┘  └──────────┘  └──────────┘  └────────────┘  │  │
//! │  └────────────────────────────┬───────────────────────────────┘  │
//! └───────────────────────────────┼──────────────────────────────────┘
//!                                 │ ChunkProducer / ChunkSource
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                           Producers                              │
//! │     HTTP NDJSON backends   │   scripted test doubles   │  ...    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamPipeline`]: The lifecycle controller that owns every stream
//! - [`StreamHandle`]: A caller's grip on one created stream
//! - [`ChunkStream`]: The ordered chunk sequence a consumed stream yields
//! - [`ChunkProducer`]: The backend capability that opens chunk sources
//! - [`StreamRequest`]: What to stream, from which backend and model
//! - [`PipelineConfig`]: Buffering, filtering, limits, and timeouts
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use conduit_core::{ScriptedProducer, StreamPipeline, StreamRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline = StreamPipeline::default();
//!     pipeline.register_provider(Arc::new(
//!         ScriptedProducer::new("scripted").with_deltas(["Hello, ", "world!"]),
//!     ));
//!
//!     let request = StreamRequest::new("scripted", "demo-model", "Say hello");
//!     let handle = pipeline.create_stream(request).await.unwrap();
//!
//!     let mut chunks = handle.consume().unwrap();
//!     while let Some(result) = chunks.next().await {
//!         print!("{}", result.unwrap().delta);
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`chunk`]: Chunk and identifier types
//! - [`provider`]: Producer capability traits plus HTTP and scripted producers
//! - [`pipeline`]: The stream pipeline itself
//! - [`handle`]: Consumer-facing handle and chunk sequence
//! - [`registry`]: Stream records, status machine, and the concurrent table
//! - [`buffer`]: Threshold-triggered chunk batching
//! - [`filter`]: Redaction rules applied to chunk text
//! - [`cancel`]: Cooperative cancellation token
//! - [`events`]: Lifecycle event bus for observers
//! - [`metrics`]: Pipeline counters and snapshots
//! - [`config`]: File, environment, and default configuration
//! - [`error`]: The stream error type
//!
//! # No Transport Dependencies
//!
//! This crate has **zero** knowledge of sockets, sessions, or rendering.
//! It's pure streaming logic that any outer layer can drive.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod handle;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod registry;

// Re-exports for convenience
pub use chunk::{Chunk, ChunkId, StreamId};
pub use error::StreamError;
pub use handle::{ChunkStream, StreamHandle};
pub use pipeline::{BatchResult, StreamPipeline};
pub use provider::{
    ChunkProducer, ChunkSource, HttpNdjsonProducer, ProducerYield, ScriptedProducer, StreamRequest,
};
pub use registry::{StreamSnapshot, StreamStatus};

// Buffering and filtering exports
pub use buffer::{BufferConfig, ChunkBuffer};
pub use filter::{ContentFilter, FilterConfig};

// Cancellation exports
pub use cancel::CancelToken;

// Observability exports
pub use events::{EventBus, StreamEvent, StreamEventKind};
pub use metrics::{MetricsSnapshot, PipelineMetrics};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConduitToml, ConfigError,
    ConfigSource, LimitsConfig, PipelineConfig,
};
