//! # Span Exporter Demo
//!
//! Generates synthetic request spans from several producer threads and ships
//! them to a collector endpoint, then shuts down and prints what happened.
//!
//! ## Running
//!
//! ```bash
//! # Against a local collector
//! cargo run -p span_exporter --bin span-exporter-demo -- \
//!     --endpoint http://localhost:4318/v1/spans --api-key dev-key
//!
//! # Log every outgoing batch body
//! cargo run -p span_exporter --bin span-exporter-demo -- --endpoint ... --debug
//! ```
//!
//! With no collector listening the exporter backs off and retries until the
//! shutdown deadline, then reports the undelivered spans as dropped.

use clap::Parser;
use rand::Rng;
use span_exporter::{
    AttributeValue, BackoffConfig, ExportError, Exporter, ExporterConfig, Span, SpanKind,
    SpanStatus,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ship synthetic spans to a collector.
#[derive(Parser, Debug)]
#[command(name = "span-exporter-demo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Collector URL batches are POSTed to
    #[arg(long, env = "SPAN_EXPORTER_ENDPOINT", default_value = "http://localhost:4318/v1/spans")]
    endpoint: String,

    /// Bearer token for the collector
    #[arg(long, env = "SPAN_EXPORTER_API_KEY", default_value = "")]
    api_key: String,

    /// Service name attached to every span and log event
    #[arg(long, env = "SPAN_EXPORTER_SERVICE_NAME", default_value = "demo-service")]
    service_name: String,

    /// Number of producer threads
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Spans generated by each producer
    #[arg(long, default_value_t = 100)]
    spans_per_producer: usize,

    /// Pause between spans of one producer, in milliseconds
    #[arg(long, default_value_t = 5)]
    interval_ms: u64,

    /// Shutdown deadline in milliseconds
    #[arg(long, default_value_t = 5000)]
    deadline_ms: u64,

    /// Minimum retry delay after a failed delivery, in milliseconds
    #[arg(long, env = "SPAN_EXPORTER_BACKOFF_FLOOR_MS", default_value_t = 1000)]
    backoff_floor_ms: u64,

    /// Enable debug logging, including batch payloads
    #[arg(short, long, env = "SPAN_EXPORTER_DEBUG")]
    debug: bool,
}

impl Cli {
    fn init_logging(&self) -> Result<(), ExportError> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = if self.debug { "debug" } else { "info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false).compact())
            .try_init()
            .map_err(|e| ExportError::Config(format!("failed to initialize logging: {e}")))
    }

    fn exporter_config(&self) -> ExporterConfig {
        let floor = Duration::from_millis(self.backoff_floor_ms);
        ExporterConfig::new(&self.endpoint, &self.api_key)
            .with_service_name(&self.service_name)
            .with_debug(self.debug)
            .with_backoff(BackoffConfig {
                floor,
                ceiling: floor.max(BackoffConfig::default().ceiling),
                ..BackoffConfig::default()
            })
    }
}

const OPERATIONS: &[(&str, SpanKind)] = &[
    ("GET /api/users", SpanKind::Server),
    ("POST /api/orders", SpanKind::Server),
    ("SELECT users", SpanKind::Client),
    ("redis GET", SpanKind::Client),
    ("publish order.created", SpanKind::Producer),
    ("render template", SpanKind::Internal),
];

fn generate_span(rng: &mut impl Rng, service_name: &str, producer_id: usize) -> Span {
    let (name, kind) = OPERATIONS[rng.gen_range(0..OPERATIONS.len())];
    // 80% of spans have a parent
    let parent = rng.gen_bool(0.8).then(|| rng.gen::<u64>());

    let mut span = Span::new(rng.gen(), rng.gen(), parent, name, kind);
    span.set_attribute("service.name", AttributeValue::String(service_name.to_string()));
    span.set_attribute("producer.id", AttributeValue::Int(producer_id as i64));

    let status = if rng.gen_bool(0.1) {
        span.set_attribute("error", AttributeValue::Bool(true));
        SpanStatus::Error
    } else {
        SpanStatus::Ok
    };
    span.finish(status);
    span
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    cli.init_logging()?;

    let exporter = Arc::new(Exporter::new(cli.exporter_config())?);
    let started = Instant::now();

    // Producers are plain threads: submit never touches the runtime.
    let producers: Vec<_> = (0..cli.producers)
        .map(|producer_id| {
            let exporter = Arc::clone(&exporter);
            let service_name = cli.service_name.clone();
            let count = cli.spans_per_producer;
            let pause = Duration::from_millis(cli.interval_ms);
            std::thread::spawn(move || -> Result<(), ExportError> {
                let mut rng = rand::thread_rng();
                for _ in 0..count {
                    match exporter.submit(generate_span(&mut rng, &service_name, producer_id)) {
                        Ok(()) => {}
                        // Exporter closed: nothing more will be accepted
                        Err(e) if e.is_terminal() => break,
                        Err(e) => return Err(e),
                    }
                    std::thread::sleep(pause);
                }
                Ok(())
            })
        })
        .collect();

    for producer in producers {
        match producer.join() {
            Ok(result) => result?,
            Err(_) => return Err("producer thread panicked".into()),
        }
    }

    let report = exporter
        .shutdown(Duration::from_millis(cli.deadline_ms))
        .await?;
    let metrics = exporter.metrics();
    let elapsed = started.elapsed();

    println!();
    println!("Export summary ({:.2?})", elapsed);
    println!("  submitted:          {}", metrics.spans_submitted());
    println!("  delivered:          {}", metrics.spans_delivered());
    println!("  dropped:            {}", metrics.spans_dropped());
    println!("  batches delivered:  {}", metrics.batches_delivered());
    println!("  transient failures: {}", metrics.transient_failures());
    println!("  permanent failures: {}", metrics.permanent_failures());
    println!(
        "  final flush:        {} delivered, {} dropped{}",
        report.delivered,
        report.dropped,
        if report.timed_out { " (deadline passed)" } else { "" }
    );

    Ok(())
}
