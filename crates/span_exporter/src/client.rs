//! Delivery Client - Serialization and the Network Call
//!
//! [`DeliveryClient`] turns a [`SpanBatch`] into one HTTP request and maps
//! whatever happens into a [`DeliveryOutcome`]:
//!
//! | Failure                         | Outcome             |
//! |---------------------------------|---------------------|
//! | batch does not serialize        | `PermanentFailure`  |
//! | connect / timeout / DNS error   | `TransientFailure`  |
//! | non-2xx status                  | `TransientFailure`  |
//! | cancelled by shutdown           | `TransientFailure`  |
//!
//! The request itself goes through the [`Transport`] trait so the exporter can
//! be driven against scripted transports in tests. [`HttpTransport`] is the
//! production implementation on top of `reqwest`.

use crate::error::{DeliveryError, ExportError};
use crate::shutdown::CancelSignal;
use crate::span::{SpanBatch, SpanRecord};
use reqwest::header::CONTENT_TYPE;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    /// Expected to succeed on retry.
    TransientFailure(DeliveryError),
    /// Retrying will not help; the batch is dropped.
    PermanentFailure(DeliveryError),
}

impl DeliveryOutcome {
    /// Classifies a transport result.
    pub fn from_result(result: Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(e) if e.is_permanent() => Self::PermanentFailure(e),
            Err(e) => Self::TransientFailure(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Bearer credential for the collector. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Where batches are delivered and with which credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: Url,
    pub api_key: ApiKey,
}

impl Endpoint {
    pub fn parse(url: &str, api_key: impl Into<String>) -> Result<Self, ExportError> {
        let url = Url::parse(url)
            .map_err(|e| ExportError::Config(format!("invalid endpoint url {url:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ExportError::Config(format!(
                "endpoint url must be http or https, got {:?}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            api_key: ApiKey::new(api_key),
        })
    }
}

/// Sends an already-serialized body to the collector.
///
/// Uses `impl Future` return types rather than `#[async_trait]`; implement it
/// with a plain `async fn`.
pub trait Transport: Send + Sync + 'static {
    /// POSTs `body` (a JSON array) to the endpoint. `Ok` means a 2xx response.
    fn post(
        &self,
        endpoint: &Endpoint,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Blanket implementation: a shared transport is still a transport
impl<T: Transport> Transport for Arc<T> {
    fn post(
        &self,
        endpoint: &Endpoint,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send {
        T::post(self, endpoint, body)
    }

    fn name(&self) -> &str {
        T::name(self)
    }
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn post(&self, endpoint: &Endpoint, body: Vec<u8>) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(endpoint.url.as_str())
            .bearer_auth(endpoint.api_key.expose())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        // Drain so the connection can be reused; the payload is not interpreted.
        if let Err(e) = response.bytes().await {
            debug!(
                status = status.as_u16(),
                error = %e,
                "could not drain collector response body"
            );
        }

        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                status: status.as_u16(),
            })
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Serializes batches and hands them to a [`Transport`].
pub struct DeliveryClient<T> {
    transport: T,
    debug_payloads: bool,
}

impl DeliveryClient<HttpTransport> {
    /// HTTP client with the given per-request timeout.
    pub fn http(timeout: Duration, debug_payloads: bool) -> Result<Self, ExportError> {
        Ok(Self::new(HttpTransport::new(timeout)?, debug_payloads))
    }
}

impl<T: Transport> DeliveryClient<T> {
    /// `debug_payloads` logs every outgoing body, unredacted, at debug level.
    pub fn new(transport: T, debug_payloads: bool) -> Self {
        Self {
            transport,
            debug_payloads,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Serializes `batch` and delivers it, giving up as soon as `cancel` fires.
    pub async fn send<S: SpanRecord>(
        &self,
        batch: &SpanBatch<S>,
        endpoint: &Endpoint,
        cancel: &CancelSignal,
    ) -> DeliveryOutcome {
        let body = match serde_json::to_vec(&batch.spans) {
            Ok(body) => body,
            Err(e) => {
                error!(
                    spans = ?batch.spans,
                    span_count = batch.len(),
                    error = %e,
                    "could not serialize span batch, dropping it"
                );
                return DeliveryOutcome::PermanentFailure(DeliveryError::Serialization(
                    e.to_string(),
                ));
            }
        };

        if self.debug_payloads {
            debug!(
                span_count = batch.len(),
                transport = self.transport.name(),
                body = %String::from_utf8_lossy(&body),
                "outgoing span batch"
            );
        }

        if cancel.is_cancelled() {
            return DeliveryOutcome::TransientFailure(DeliveryError::Cancelled);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => DeliveryOutcome::TransientFailure(DeliveryError::Cancelled),
            result = self.transport.post(endpoint, body) => DeliveryOutcome::from_result(result),
        }
    }
}
