//! Batched Trace-Span Exporter
//!
//! Accepts spans from any number of producer threads and ships them, batched,
//! as a JSON array over HTTP(S) POST to a collector. Producers never wait on
//! the network: `submit` appends to a mutex-guarded buffer and wakes a single
//! tokio worker task, which drains the buffer, sends the batch and decides
//! what happens to it from the outcome.
//!
//! - **Success** releases the batch and resets the backoff.
//! - **Transient failure** (transport error, non-2xx) puts the batch back in
//!   front of newer records and doubles the retry interval up to a ceiling.
//! - **Permanent failure** (the batch can't be serialized) drops and logs it.
//!
//! ```no_run
//! use span_exporter::{Exporter, ExporterConfig, Span, SpanKind, SpanStatus};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), span_exporter::ExportError> {
//! let config = ExporterConfig::new("https://collector.example.com/v1/spans", "api-key")
//!     .with_service_name("checkout");
//! let exporter = Exporter::new(config)?;
//!
//! let mut span = Span::new(1, 1, None, "POST /orders", SpanKind::Server);
//! span.finish(SpanStatus::Ok);
//! exporter.submit(span)?;
//!
//! let report = exporter.shutdown(Duration::from_secs(5)).await?;
//! assert!(!report.timed_out);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod shutdown;
pub mod span;

mod invariants;
#[cfg(test)]
mod test_support;

// Re-export main types
pub use backoff::{BackoffConfig, BackoffPolicy, BackoffState};
pub use buffer::{OverflowPolicy, SpanBuffer};
pub use client::{ApiKey, DeliveryClient, DeliveryOutcome, Endpoint, HttpTransport, Transport};
pub use config::ExporterConfig;
pub use error::{DeliveryError, ExportError};
pub use exporter::{Exporter, ExporterState, ShutdownReport};
pub use metrics::ExportMetrics;
pub use shutdown::{cancellation, CancelSignal, Canceller};
pub use span::{AttributeValue, Span, SpanBatch, SpanKind, SpanStatus, SpanRecord};
