//! Exporter - Orchestrating Buffer, Backoff and Delivery
//!
//! Producers call [`Exporter::submit`] from any thread; it appends to the
//! shared [`SpanBuffer`] and wakes the delivery worker, then returns. All
//! network I/O happens on one tokio task that owns the [`BackoffPolicy`] and
//! the [`DeliveryClient`], so at most one batch is in flight at a time.
//!
//! # State Transitions
//!
//! ```text
//!            eligible trigger, buffer non-empty
//! ┌──────┐ ─────────────────────────────────► ┌─────────┐
//! │ Idle │                                    │ Sending │
//! └──────┘ ◄───────────────────────────────── └─────────┘
//!    │ ▲        success / permanent failure        │
//!    │ │                                           │ transient failure
//!    │ │  interval elapsed + trigger               ▼
//!    │ └──────────────────────────────────── ┌────────────┐
//!    │                                       │ BackingOff │
//!    │ shutdown                              └────────────┘
//!    ▼                                             │ shutdown
//! ┌──────────┐ ◄───────────────────────────────────┘
//! │ ShutDown │
//! └──────────┘
//! ```
//!
//! Triggers are submissions and the worker's own retry timer, which fires when
//! the backoff interval elapses while records are still pending.

use crate::backoff::BackoffPolicy;
use crate::buffer::SpanBuffer;
use crate::client::{DeliveryClient, DeliveryOutcome, Endpoint, HttpTransport, Transport};
use crate::config::ExporterConfig;
use crate::error::{DeliveryError, ExportError};
#[cfg(debug_assertions)]
use crate::invariants::{debug_assert_batch_retained, debug_assert_single_inflight};
use crate::metrics::ExportMetrics;
use crate::shutdown::{CancelSignal, ShutdownState};
use crate::span::{SpanBatch, SpanRecord};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Observable delivery state of an exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExporterState {
    /// No attempt in flight; the buffer may or may not hold records.
    Idle = 0,
    /// A batch is on the wire.
    Sending = 1,
    /// The last attempt failed transiently; waiting for the interval.
    BackingOff = 2,
    /// Terminal. Submissions are rejected.
    ShutDown = 3,
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ExporterState::Idle as u8))
    }

    fn get(&self) -> ExporterState {
        match self.0.load(Ordering::Acquire) {
            0 => ExporterState::Idle,
            1 => ExporterState::Sending,
            2 => ExporterState::BackingOff,
            _ => ExporterState::ShutDown,
        }
    }

    fn set(&self, state: ExporterState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// What happened to the records still pending when shutdown began.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Records delivered by the final flush
    pub delivered: u64,
    /// Records dropped after shutdown began
    pub dropped: u64,
    /// The deadline passed before the final flush completed
    pub timed_out: bool,
}

struct WorkerHandle {
    task: JoinHandle<ShutdownReport>,
    stop_tx: oneshot::Sender<()>,
}

/// Buffers spans from any number of producers and delivers them in batches.
///
/// Must be created inside a tokio runtime; submission itself is synchronous
/// and may be called from plain threads.
pub struct Exporter<S> {
    buffer: Arc<SpanBuffer<S>>,
    trigger: Arc<Notify>,
    shutdown: Arc<ShutdownState>,
    state: Arc<StateCell>,
    metrics: Arc<ExportMetrics>,
    worker: Mutex<Option<WorkerHandle>>,
    service_name: String,
}

impl<S: SpanRecord> Exporter<S> {
    /// Creates an exporter delivering over HTTP and starts its worker.
    pub fn new(config: ExporterConfig) -> Result<Self, ExportError> {
        let client = DeliveryClient::<HttpTransport>::http(config.request_timeout, config.debug)?;
        Self::with_client(config, client)
    }

    /// Creates an exporter delivering through a custom transport.
    pub fn with_transport<T: Transport>(
        config: ExporterConfig,
        transport: T,
    ) -> Result<Self, ExportError> {
        let debug_payloads = config.debug;
        Self::with_client(config, DeliveryClient::new(transport, debug_payloads))
    }

    fn with_client<T: Transport>(
        config: ExporterConfig,
        client: DeliveryClient<T>,
    ) -> Result<Self, ExportError> {
        let endpoint = config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ExportError::Runtime(e.to_string()))?;

        let buffer = Arc::new(SpanBuffer::new(config.max_buffered_spans, config.overflow));
        let trigger = Arc::new(Notify::new());
        let shutdown = Arc::new(ShutdownState::new());
        let state = Arc::new(StateCell::new());
        let metrics = Arc::new(ExportMetrics::default());

        info!(
            endpoint = %endpoint.url,
            service = %config.service_name,
            transport = client.transport().name(),
            max_buffered_spans = config.max_buffered_spans,
            "span exporter started"
        );

        let worker = DeliveryWorker {
            buffer: Arc::clone(&buffer),
            client,
            endpoint,
            backoff: BackoffPolicy::new(config.backoff),
            trigger: Arc::clone(&trigger),
            shutdown: Arc::clone(&shutdown),
            cancel: shutdown.cancel_signal(),
            state: Arc::clone(&state),
            metrics: Arc::clone(&metrics),
            debug_payloads: config.debug,
            report: ShutdownReport::default(),
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = runtime.spawn(
            worker
                .run(stop_rx)
                .instrument(info_span!("span_exporter", service = %config.service_name)),
        );

        Ok(Self {
            buffer,
            trigger,
            shutdown,
            state,
            metrics,
            worker: Mutex::new(Some(WorkerHandle { task, stop_tx })),
            service_name: config.service_name,
        })
    }

    /// Buffers one record and wakes the delivery worker. Never waits on I/O.
    pub fn submit(&self, span: S) -> Result<(), ExportError> {
        let dropped = self
            .shutdown
            .admit(|| {
                self.metrics.record_submitted(1);
                self.buffer.append(span)
            })
            .ok_or(ExportError::Closed)?;
        self.after_append(dropped);
        Ok(())
    }

    /// Buffers records in order under one lock acquisition.
    pub fn submit_many<I>(&self, spans: I) -> Result<(), ExportError>
    where
        I: IntoIterator<Item = S>,
    {
        let spans: Vec<S> = spans.into_iter().collect();
        if spans.is_empty() {
            return if self.shutdown.is_closed() {
                Err(ExportError::Closed)
            } else {
                Ok(())
            };
        }
        let dropped = self
            .shutdown
            .admit(|| {
                self.metrics.record_submitted(spans.len() as u64);
                self.buffer.append_many(spans)
            })
            .ok_or(ExportError::Closed)?;
        self.after_append(dropped);
        Ok(())
    }

    fn after_append(&self, dropped: usize) {
        if dropped > 0 {
            self.metrics.record_dropped(dropped as u64);
            warn!(
                service = %self.service_name,
                dropped,
                capacity = self.buffer.capacity(),
                "span buffer full, dropping records"
            );
        }
        self.trigger.notify_one();
    }

    /// Stops accepting records, makes one final delivery attempt for whatever
    /// is buffered and waits for it up to `deadline`.
    ///
    /// When the deadline passes the in-flight call is cancelled and the
    /// remaining records are logged and dropped. A second call returns
    /// [`ExportError::Closed`].
    pub async fn shutdown(&self, deadline: Duration) -> Result<ShutdownReport, ExportError> {
        let deadline_at = Instant::now() + deadline;
        if !self.shutdown.close() {
            return Err(ExportError::Closed);
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(WorkerHandle { mut task, stop_tx }) = worker else {
            return Err(ExportError::Closed);
        };

        info!(
            service = %self.service_name,
            buffered = self.buffer.len(),
            deadline_ms = deadline.as_millis() as u64,
            "shutting down span exporter"
        );
        // The worker may have exited already; the join below reports why.
        let _ = stop_tx.send(());

        let (joined, timed_out) = match timeout_at(deadline_at, &mut task).await {
            Ok(joined) => (joined, false),
            Err(_) => {
                self.shutdown.cancel();
                (task.await, true)
            }
        };

        let mut report = match joined {
            Ok(report) => report,
            Err(e) => {
                let leftover = self.buffer.drain_for_send();
                let dropped = leftover.len() as u64;
                self.metrics.record_dropped(dropped);
                error!(
                    service = %self.service_name,
                    error = %e,
                    dropped,
                    "delivery worker failed, dropping buffered records"
                );
                ShutdownReport {
                    dropped,
                    ..ShutdownReport::default()
                }
            }
        };
        report.timed_out |= timed_out;
        if report.timed_out {
            warn!(
                service = %self.service_name,
                dropped = report.dropped,
                "shutdown deadline passed before the final flush completed"
            );
        }

        self.state.set(ExporterState::ShutDown);
        Ok(report)
    }

    pub fn state(&self) -> ExporterState {
        self.state.get()
    }

    pub fn metrics(&self) -> &ExportMetrics {
        &self.metrics
    }

    /// Records waiting for the next delivery attempt.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_closed()
    }
}

impl<S> Drop for Exporter<S> {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            // Dropped without shutdown: let the worker flush on its own.
            self.shutdown.close();
            let _ = worker.stop_tx.send(());
        }
    }
}

/// The single delivery path. Owns the backoff state and the client.
struct DeliveryWorker<S, T> {
    buffer: Arc<SpanBuffer<S>>,
    client: DeliveryClient<T>,
    endpoint: Endpoint,
    backoff: BackoffPolicy,
    trigger: Arc<Notify>,
    shutdown: Arc<ShutdownState>,
    cancel: CancelSignal,
    state: Arc<StateCell>,
    metrics: Arc<ExportMetrics>,
    debug_payloads: bool,
    report: ShutdownReport,
}

impl<S: SpanRecord, T: Transport> DeliveryWorker<S, T> {
    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) -> ShutdownReport {
        loop {
            let retry_at = self.pending_retry();
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                () = self.trigger.notified() => {}
                () = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {}
            }

            if !self.backoff.is_eligible(Instant::now()) {
                // Woken by a submission mid-interval; the retry timer covers it.
                continue;
            }
            self.attempt().await;
        }

        self.final_flush().await
    }

    /// When to wake up on our own: records are pending and the backoff has a
    /// recorded attempt to measure from.
    fn pending_retry(&self) -> Option<Instant> {
        if self.buffer.is_empty() {
            None
        } else {
            self.backoff.eligible_at()
        }
    }

    async fn attempt(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert_single_inflight!(self.state.get());

        let batch = self.buffer.drain_for_send();
        if batch.is_empty() {
            return;
        }
        let span_count = batch.len();
        self.state.set(ExporterState::Sending);

        let outcome = self.client.send(&batch, &self.endpoint, &self.cancel).await;
        match &outcome {
            DeliveryOutcome::Success => {
                let interval = self.backoff.next_interval(&outcome);
                self.metrics.record_delivered(span_count as u64);
                self.metrics.set_backoff(interval);
                debug!(span_count, "span batch delivered");
                self.state.set(ExporterState::Idle);
            }
            DeliveryOutcome::TransientFailure(error) if self.shutdown.is_cancelled() => {
                self.metrics.record_transient();
                self.report.dropped += span_count as u64;
                self.report.timed_out = true;
                self.drop_batch(batch, error, "shutdown deadline passed during delivery");
                self.state.set(ExporterState::Idle);
            }
            DeliveryOutcome::TransientFailure(error) => {
                let interval = self.backoff.next_interval(&outcome);
                self.metrics.record_transient();
                self.metrics.set_backoff(interval);

                let spans = self.debug_payloads.then(|| format!("{:?}", batch.spans));
                let dropped = self.buffer.restore(batch);
                #[cfg(debug_assertions)]
                debug_assert_batch_retained!(self.buffer.len(), span_count, dropped);
                self.metrics.record_dropped(dropped as u64);

                let backoff_ms = interval.as_millis() as u64;
                if let Some(spans) = spans {
                    warn!(
                        span_count,
                        error = %error,
                        backoff_ms,
                        dropped,
                        spans = %spans,
                        "could not deliver span batch, retaining it for retry"
                    );
                } else {
                    warn!(
                        span_count,
                        error = %error,
                        backoff_ms,
                        dropped,
                        "could not deliver span batch, retaining it for retry"
                    );
                }
                self.state.set(ExporterState::BackingOff);
            }
            DeliveryOutcome::PermanentFailure(error) => {
                self.metrics.record_permanent();
                self.drop_batch(batch, error, "batch can never be delivered");
                self.state.set(ExporterState::Idle);
            }
        }
    }

    /// One last drain-and-send, regardless of backoff.
    async fn final_flush(mut self) -> ShutdownReport {
        let batch = self.buffer.drain_for_send();
        if !batch.is_empty() {
            let span_count = batch.len() as u64;
            self.state.set(ExporterState::Sending);

            match self.client.send(&batch, &self.endpoint, &self.cancel).await {
                DeliveryOutcome::Success => {
                    self.metrics.record_delivered(span_count);
                    self.report.delivered += span_count;
                }
                DeliveryOutcome::TransientFailure(DeliveryError::Cancelled) => {
                    self.report.dropped += span_count;
                    self.report.timed_out = true;
                    self.drop_batch(
                        batch,
                        &DeliveryError::Cancelled,
                        "shutdown deadline passed before the final flush completed",
                    );
                }
                DeliveryOutcome::TransientFailure(error) => {
                    self.metrics.record_transient();
                    self.report.dropped += span_count;
                    self.drop_batch(batch, &error, "final flush failed");
                }
                DeliveryOutcome::PermanentFailure(error) => {
                    self.metrics.record_permanent();
                    self.report.dropped += span_count;
                    self.drop_batch(batch, &error, "batch can never be delivered");
                }
            }
        }

        self.state.set(ExporterState::ShutDown);
        info!(
            delivered = self.report.delivered,
            dropped = self.report.dropped,
            timed_out = self.report.timed_out,
            "span exporter stopped"
        );
        self.report
    }

    fn drop_batch(&self, batch: SpanBatch<S>, error: &DeliveryError, reason: &str) {
        let span_count = batch.len();
        self.metrics.record_dropped(span_count as u64);
        if self.debug_payloads {
            error!(span_count, error = %error, reason, spans = ?batch.spans, "dropping span batch");
        } else {
            error!(span_count, error = %error, reason, "dropping span batch");
        }
    }
}
