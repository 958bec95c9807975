//! Stream Pipeline - The Lifecycle Controller
//!
//! The pipeline owns every stream from creation to purge. It resolves
//! producers, enforces creation-time limits, drives consumption through the
//! per-stream buffer, and applies the terminal bookkeeping (status, metrics,
//! events, retention).
//!
//! # Design Philosophy
//!
//! The pipeline is producer-agnostic. It doesn't know or care whether chunks
//! come from an HTTP backend, a local process, or a scripted test double. It
//! talks to producers only through [`ChunkProducer`] and [`ChunkSource`], and
//! to consumers only through the handle returned at creation. This
//! separation enables:
//! - Pluggable backends registered at runtime
//! - Deterministic tests with scripted producers
//! - One set of lifecycle rules for every backend
//!
//! Consumption is pull-based: nothing is pulled from a producer until the
//! stream's handle is consumed, and each stream is driven by its own spawned
//! task so one stalled backend never blocks the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::buffer::ChunkBuffer;
use crate::cancel::CancelToken;
use crate::chunk::{Chunk, ChunkId, StreamId};
use crate::config::PipelineConfig;
use crate::error::StreamError;
use crate::events::{EventBus, StreamEvent, StreamEventKind};
use crate::filter::ContentFilter;
use crate::handle::StreamHandle;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::provider::{ChunkProducer, ChunkSource, ProducerYield, StreamRequest};
use crate::registry::{StreamRecord, StreamRegistry, StreamSnapshot, StreamStatus};

/// Capacity of each stream's batch delivery channel
const BATCH_CHANNEL_CAPACITY: usize = 64;

/// A batch of chunks or the terminal error, as delivered to the consumer
pub type BatchResult = Result<Vec<Chunk>, StreamError>;

// ============================================================================
// Pipeline
// ============================================================================

/// The streaming pipeline
///
/// Cheap to share: every public surface takes `&self`, and handles keep the
/// inner state alive on their own.
pub struct StreamPipeline {
    core: Arc<PipelineCore>,
}

impl StreamPipeline {
    /// Create a pipeline with the given configuration
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let filter = ContentFilter::new(config.filter.clone());
        Self {
            core: Arc::new(PipelineCore {
                config,
                filter,
                providers: DashMap::new(),
                registry: StreamRegistry::new(),
                admitted: AtomicUsize::new(0),
                metrics: PipelineMetrics::new(),
                events: EventBus::new(),
                retention_tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a producer under the backend name it reports
    ///
    /// Registering a second producer for the same backend replaces the first;
    /// streams already opened on the old producer are unaffected.
    pub fn register_provider(&self, producer: Arc<dyn ChunkProducer>) {
        let backend = producer.backend().to_string();
        let replaced = self
            .core
            .providers
            .insert(backend.clone(), producer)
            .is_some();
        if replaced {
            tracing::warn!(backend = %backend, "Replacing already registered producer");
        } else {
            tracing::info!(backend = %backend, "Producer registered");
        }
    }

    /// Backend names with a registered producer
    #[must_use]
    pub fn provider_backends(&self) -> Vec<String> {
        self.core
            .providers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Create a stream for `request` and return its handle
    ///
    /// Validates the request, resolves the producer, claims an admission
    /// slot against the concurrency limit, and primes a chunk source.
    /// Nothing is pulled from the producer until the handle is consumed.
    ///
    /// # Errors
    ///
    /// [`StreamError::InvalidRequest`] for a malformed request,
    /// [`StreamError::UnsupportedProvider`] for an unknown backend,
    /// [`StreamError::TooManyStreams`] at the concurrency limit, and
    /// [`StreamError::Producer`] when priming fails. On any error nothing
    /// stays registered.
    pub async fn create_stream(&self, request: StreamRequest) -> Result<StreamHandle, StreamError> {
        if let Err(err) = request.validate(&self.core.config.limits) {
            tracing::warn!(
                request_id = %request.request_id,
                error = %err,
                "Stream request rejected"
            );
            return Err(err);
        }

        let producer = match self.core.providers.get(&request.backend) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                let available = self.provider_backends();
                tracing::warn!(
                    backend = %request.backend,
                    ?available,
                    "No producer registered for backend"
                );
                return Err(StreamError::UnsupportedProvider(request.backend.clone()));
            }
        };

        // The slot must be claimed before the priming await: a plain count
        // check here would let every concurrent creation read the same
        // count and admit past the limit.
        self.core.claim_slot()?;

        let id = StreamId::new();
        let cancel = CancelToken::new();
        let source = match producer.open(&request, cancel.clone()).await {
            Ok(source) => source,
            Err(err) => {
                self.core.release_slot();
                tracing::warn!(
                    backend = %request.backend,
                    error = format!("{err:#}"),
                    "Producer failed to prime a stream"
                );
                return Err(StreamError::producer_failure(id, &err));
            }
        };

        let created = StreamEventKind::Created {
            request_id: request.request_id.clone(),
            backend: request.backend.clone(),
        };
        tracing::info!(
            stream_id = %id,
            request_id = %request.request_id,
            backend = %request.backend,
            model = %request.model,
            "Stream created"
        );

        self.core.metrics.record_created();
        self.core
            .registry
            .insert(StreamRecord::new(id, request, source, cancel));
        self.core.registry.transition(&id, StreamStatus::Active);
        self.core.events.emit(StreamEvent::new(id, created));

        Ok(StreamHandle::new(id, Arc::clone(&self.core)))
    }

    /// Cancel a stream
    ///
    /// Idempotent and never fails: cancelling an unknown, purged, or already
    /// terminal stream is a no-op. A live stream stops producing, drops any
    /// buffered chunks, and is purged from the registry before this returns.
    pub fn cancel_stream(&self, id: StreamId) {
        self.core.cancel(id);
    }

    /// Snapshot of one stream, if it is still tracked
    #[must_use]
    pub fn status(&self, id: &StreamId) -> Option<StreamSnapshot> {
        self.core.registry.snapshot(id)
    }

    /// Snapshots of every tracked stream
    ///
    /// Terminal streams stay listed until their retention purge; cancelled
    /// streams leave at once.
    #[must_use]
    pub fn list_active(&self) -> Vec<StreamSnapshot> {
        self.core.registry.snapshots()
    }

    /// Number of streams counted against the concurrency limit
    ///
    /// Admitted and not yet terminal, creations still priming their
    /// producer included.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.core.admitted.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the pipeline counters
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Subscribe to lifecycle events
    ///
    /// Delivery is best-effort; see [`EventBus`](crate::events::EventBus).
    #[must_use]
    pub fn subscribe(&self) -> mpsc::Receiver<StreamEvent> {
        self.core.events.subscribe()
    }

    /// The configuration this pipeline runs with
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.core.config
    }
}

impl Default for StreamPipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

// ============================================================================
// Core State
// ============================================================================

/// Shared pipeline state, kept alive by the pipeline, its handles, and the
/// per-stream driver tasks
pub(crate) struct PipelineCore {
    config: PipelineConfig,
    filter: ContentFilter,
    providers: DashMap<String, Arc<dyn ChunkProducer>>,
    registry: StreamRegistry,
    /// Admission slots held by live streams, creations mid-priming included
    admitted: AtomicUsize,
    metrics: PipelineMetrics,
    events: EventBus,
    /// Pending purge timers for terminal streams, aborted on early purge
    retention_tasks: Mutex<HashMap<StreamId, JoinHandle<()>>>,
}

/// Outcome of one driver wait
enum Pulled {
    Yielded(ProducerYield),
    ProducerFailed(anyhow::Error),
    TimedOut,
    FlushDue,
    Cancelled,
}

impl PipelineCore {
    /// Claim one admission slot against the concurrency limit
    ///
    /// Check and claim are a single compare-exchange, so no two creations
    /// can win the same slot however they interleave.
    fn claim_slot(&self) -> Result<(), StreamError> {
        let limit = self.config.limits.max_concurrent_streams;
        let mut current = self.admitted.load(Ordering::Relaxed);
        loop {
            if current >= limit {
                tracing::warn!(current, limit, "Stream request rejected at concurrency limit");
                return Err(StreamError::TooManyStreams { current, limit });
            }
            match self.admitted.compare_exchange(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Release one admission slot
    ///
    /// Exactly once per claimed slot: on the priming error path, or with
    /// the stream's single terminal transition.
    fn release_slot(&self) {
        self.admitted.fetch_sub(1, Ordering::Relaxed);
    }

    /// Begin consumption: take the source and spawn the driver task
    pub(crate) fn start_consumption(
        self: &Arc<Self>,
        id: StreamId,
    ) -> Result<mpsc::Receiver<BatchResult>, StreamError> {
        match self.registry.mark_consumed(&id) {
            // Only cancellation purges a live stream, so a missing record
            // behind a live handle means the stream was cancelled.
            None => return Err(StreamError::Cancelled(id)),
            Some(false) => return Err(StreamError::AlreadyConsumed(id)),
            Some(true) => {}
        }

        let Some(source) = self.registry.take_source(&id) else {
            return Err(StreamError::Cancelled(id));
        };
        let Some(cancel) = self.registry.cancel_token(&id) else {
            return Err(StreamError::Cancelled(id));
        };
        let request_id = self
            .registry
            .snapshot(&id)
            .map(|snapshot| snapshot.request_id)
            .ok_or(StreamError::Cancelled(id))?;

        self.registry.transition(&id, StreamStatus::Streaming);
        tracing::info!(stream_id = %id, "Consumption started");
        self.events
            .emit(StreamEvent::new(id, StreamEventKind::StreamingStarted));

        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let core = Arc::clone(self);
        tokio::spawn(core.drive(id, request_id, source, cancel, tx));
        Ok(rx)
    }

    /// Cancel a stream; see [`StreamPipeline::cancel_stream`]
    pub(crate) fn cancel(&self, id: StreamId) {
        let Some(token) = self.registry.cancel_token(&id) else {
            tracing::debug!(stream_id = %id, "Cancel of unknown stream ignored");
            return;
        };

        if !self.registry.transition(&id, StreamStatus::Cancelled) {
            // Already terminal; the retention timer owns its purge.
            return;
        }
        self.release_slot();
        token.cancel();

        let duration = self
            .registry
            .snapshot(&id)
            .map(|snapshot| snapshot.elapsed)
            .unwrap_or_default();
        self.metrics.record_cancelled(duration);
        tracing::info!(stream_id = %id, ?duration, "Stream cancelled");
        self.events
            .emit(StreamEvent::new(id, StreamEventKind::Cancelled));

        self.purge(id);
    }

    /// Drive one stream: pull, filter, buffer, deliver, finish
    async fn drive(
        self: Arc<Self>,
        id: StreamId,
        request_id: String,
        mut source: Box<dyn ChunkSource>,
        cancel: CancelToken,
        tx: mpsc::Sender<BatchResult>,
    ) {
        let mut buffer = ChunkBuffer::new(self.config.buffer.clone());
        let mut next_id = ChunkId::first();
        let mut content = String::new();

        loop {
            // The flush timer may interrupt the pull; the pull is restarted
            // afterwards and the chunk timeout clock restarts with it.
            let flush_timer = async {
                match buffer.next_deadline() {
                    Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                    None => std::future::pending().await,
                }
            };
            let pulled = tokio::select! {
                () = cancel.cancelled() => Pulled::Cancelled,
                () = flush_timer => Pulled::FlushDue,
                outcome = tokio::time::timeout(self.config.chunk_timeout, source.next_chunk()) => {
                    match outcome {
                        Ok(Ok(yielded)) => Pulled::Yielded(yielded),
                        Ok(Err(err)) => Pulled::ProducerFailed(err),
                        Err(_) => Pulled::TimedOut,
                    }
                }
            };

            match pulled {
                Pulled::Yielded(ProducerYield::Delta(raw)) => {
                    let delta = self.filter.apply(&raw);
                    content.push_str(&delta);
                    let chunk = Chunk::new(next_id, &request_id, content.clone(), delta);
                    next_id = next_id.next();

                    self.metrics.record_chunk();
                    self.events.emit(StreamEvent::new(
                        id,
                        StreamEventKind::ChunkAccepted {
                            chunk_id: chunk.id,
                            delta_bytes: chunk.delta.len(),
                        },
                    ));

                    let released = buffer.push(chunk.clone());
                    self.registry.record_chunk(&id, chunk, buffer.len());
                    if let Some(batch) = released {
                        if !self.deliver(id, batch, &cancel, &tx).await {
                            self.cancel(id);
                            buffer.discard();
                            return;
                        }
                    }
                }
                Pulled::Yielded(ProducerYield::Exhausted) => {
                    self.complete_stream(id, &mut buffer, &cancel, &tx).await;
                    return;
                }
                Pulled::ProducerFailed(err) => {
                    let error = StreamError::producer_failure(id, &err);
                    self.fail_stream(id, error, &mut buffer, &cancel, &tx).await;
                    return;
                }
                Pulled::TimedOut => {
                    let error = StreamError::ChunkTimeout {
                        stream_id: id,
                        timeout: self.config.chunk_timeout,
                    };
                    self.fail_stream(id, error, &mut buffer, &cancel, &tx).await;
                    return;
                }
                Pulled::FlushDue => {
                    let batch = buffer.flush();
                    if batch.is_empty() {
                        continue;
                    }
                    self.registry.set_buffer_depth(&id, 0);
                    if !self.deliver(id, batch, &cancel, &tx).await {
                        self.cancel(id);
                        buffer.discard();
                        return;
                    }
                }
                Pulled::Cancelled => {
                    let dropped = buffer.discard();
                    tracing::debug!(stream_id = %id, dropped, "Driver stopped by cancellation");
                    return;
                }
            }
        }
    }

    /// Send one batch to the consumer; false when delivery must stop
    ///
    /// The send is raced against the cancel token: with the channel full
    /// and the consumer stalled, a cancelled driver must not stay parked
    /// on the send until the consumer reads or drops.
    async fn deliver(
        &self,
        id: StreamId,
        batch: Vec<Chunk>,
        cancel: &CancelToken,
        tx: &mpsc::Sender<BatchResult>,
    ) -> bool {
        let batch_size = batch.len();
        let sent = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(
                    stream_id = %id,
                    batch_size,
                    "Cancelled mid-delivery; batch dropped"
                );
                return false;
            }
            sent = tx.send(Ok(batch)) => sent,
        };
        if sent.is_err() {
            tracing::debug!(
                stream_id = %id,
                "Consumer dropped its receiver; treating as cancellation"
            );
            return false;
        }
        tracing::debug!(stream_id = %id, batch_size, "Batch flushed");
        self.events
            .emit(StreamEvent::new(id, StreamEventKind::Flushed { batch_size }));
        true
    }

    /// Terminal bookkeeping for a producer that finished cleanly
    ///
    /// Completion is lossless: the residual batch reaches the consumer
    /// before the completion event.
    async fn complete_stream(
        self: &Arc<Self>,
        id: StreamId,
        buffer: &mut ChunkBuffer,
        cancel: &CancelToken,
        tx: &mpsc::Sender<BatchResult>,
    ) {
        let residual = buffer.take_residual();
        if !residual.is_empty() {
            self.registry.set_buffer_depth(&id, 0);
            if !self.deliver(id, residual, cancel, tx).await {
                self.cancel(id);
                return;
            }
        }

        // A concurrent cancel may win the terminal transition; its
        // bookkeeping already ran, so this path must not double-count.
        if !self.registry.transition(&id, StreamStatus::Completed) {
            return;
        }
        self.release_slot();
        let (chunk_count, duration) = self
            .registry
            .snapshot(&id)
            .map(|snapshot| (snapshot.chunk_count as u64, snapshot.elapsed))
            .unwrap_or((0, Duration::ZERO));
        self.metrics.record_completed(chunk_count, duration);
        tracing::info!(stream_id = %id, chunk_count, ?duration, "Stream completed");
        self.events.emit(StreamEvent::new(
            id,
            StreamEventKind::Completed {
                chunk_count,
                duration,
            },
        ));
        self.schedule_retention(id);
    }

    /// Terminal bookkeeping for a failed stream
    ///
    /// Fail-fast: buffered chunks are dropped, not delivered, and the
    /// consumer sees the error as the final item of its sequence.
    async fn fail_stream(
        self: &Arc<Self>,
        id: StreamId,
        error: StreamError,
        buffer: &mut ChunkBuffer,
        cancel: &CancelToken,
        tx: &mpsc::Sender<BatchResult>,
    ) {
        cancel.cancel();
        let dropped = buffer.discard();
        if dropped > 0 {
            tracing::warn!(stream_id = %id, dropped, "Failing stream dropped buffered chunks");
        }

        self.registry.set_error(&id, error.clone());
        // A concurrent cancel may win the terminal transition; its
        // bookkeeping already ran, so this path must not double-count.
        if !self.registry.transition(&id, StreamStatus::Failed) {
            return;
        }
        self.release_slot();
        self.registry.set_buffer_depth(&id, 0);
        let duration = self
            .registry
            .snapshot(&id)
            .map(|snapshot| snapshot.elapsed)
            .unwrap_or_default();
        self.metrics.record_failed(duration);
        tracing::warn!(stream_id = %id, error = %error, "Stream failed");
        self.events.emit(StreamEvent::new(
            id,
            StreamEventKind::Failed {
                error: error.clone(),
            },
        ));

        let _ = tx.send(Err(error)).await;
        self.schedule_retention(id);
    }

    /// Arm the purge timer for a terminal stream
    ///
    /// The map lock is held across the spawn so the timer cannot fire and
    /// try to remove its entry before the entry exists.
    fn schedule_retention(self: &Arc<Self>, id: StreamId) {
        let window = self.config.retention_window;
        let core = Arc::clone(self);
        let mut tasks = self.retention_tasks.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            core.purge(id);
        });
        tasks.insert(id, handle);
    }

    /// Remove a stream from the registry and disarm its retention timer
    fn purge(&self, id: StreamId) {
        if let Some(handle) = self.retention_tasks.lock().remove(&id) {
            handle.abort();
        }
        if self.registry.remove(&id) {
            self.events.emit(StreamEvent::new(id, StreamEventKind::Purged));
        }
    }
}
