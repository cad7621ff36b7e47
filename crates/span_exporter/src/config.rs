//! Configuration for the exporter.

use crate::backoff::BackoffConfig;
use crate::buffer::OverflowPolicy;
use crate::client::Endpoint;
use crate::error::ExportError;
use std::time::Duration;

/// Exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Collector URL batches are POSTed to.
    pub endpoint: String,

    /// Sent as `Authorization: Bearer <api_key>`.
    pub api_key: String,

    /// Tags every log event emitted by the exporter.
    ///
    /// Default: "unknown_service"
    pub service_name: String,

    /// Log each outgoing batch body, unredacted, at debug level.
    ///
    /// Default: false
    pub debug: bool,

    /// Retry delays after failed deliveries.
    pub backoff: BackoffConfig,

    /// Upper bound on any single HTTP request, connect included.
    ///
    /// Default: 10s
    pub request_timeout: Duration,

    /// Ceiling on pending records before overflow kicks in.
    ///
    /// Default: 100 000
    pub max_buffered_spans: usize,

    /// Which records to discard once the ceiling is hit.
    ///
    /// Default: `DropOldest`
    pub overflow: OverflowPolicy,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            service_name: "unknown_service".to_string(),
            debug: false,
            backoff: BackoffConfig::default(),
            request_timeout: Duration::from_secs(10),
            max_buffered_spans: 100_000,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl ExporterConfig {
    /// Creates a configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from `SPAN_EXPORTER_*` environment variables.
    ///
    /// `SPAN_EXPORTER_ENDPOINT` is required; everything else falls back to
    /// the defaults.
    pub fn from_env() -> Result<Self, ExportError> {
        let endpoint = std::env::var("SPAN_EXPORTER_ENDPOINT")
            .map_err(|_| ExportError::Config("SPAN_EXPORTER_ENDPOINT is not set".into()))?;
        let defaults = Self::default();

        let config = Self {
            endpoint,
            api_key: std::env::var("SPAN_EXPORTER_API_KEY").unwrap_or_default(),
            service_name: std::env::var("SPAN_EXPORTER_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            debug: env_parse("SPAN_EXPORTER_DEBUG").unwrap_or(false),
            backoff: BackoffConfig {
                floor: env_parse("SPAN_EXPORTER_BACKOFF_FLOOR_MS")
                    .map_or(defaults.backoff.floor, Duration::from_millis),
                ceiling: env_parse("SPAN_EXPORTER_BACKOFF_CEILING_MS")
                    .map_or(defaults.backoff.ceiling, Duration::from_millis),
                ..defaults.backoff
            },
            request_timeout: env_parse("SPAN_EXPORTER_TIMEOUT_MS")
                .map_or(defaults.request_timeout, Duration::from_millis),
            max_buffered_spans: env_parse("SPAN_EXPORTER_MAX_BUFFERED_SPANS")
                .unwrap_or(defaults.max_buffered_spans),
            overflow: defaults.overflow,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the service name.
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Enables or disables debug payload logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the backoff configuration.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the buffer ceiling and overflow policy.
    pub fn with_buffer_limit(mut self, max_buffered_spans: usize, overflow: OverflowPolicy) -> Self {
        self.max_buffered_spans = max_buffered_spans;
        self.overflow = overflow;
        self
    }

    /// Checks every field and resolves the endpoint.
    pub fn validate(&self) -> Result<Endpoint, ExportError> {
        self.backoff.validate()?;
        if self.request_timeout.is_zero() {
            return Err(ExportError::Config("request timeout must be greater than zero".into()));
        }
        if self.max_buffered_spans == 0 {
            return Err(ExportError::Config("max_buffered_spans must be at least 1".into()));
        }
        Endpoint::parse(&self.endpoint, self.api_key.clone())
    }
}
