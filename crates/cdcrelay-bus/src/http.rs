//! HTTP fan-out bus client backed by `reqwest`.
//!
//! Posts one JSON [`PublishRequest`] per envelope to the configured endpoint
//! and expects a [`PublishResponse`] back. Transient failures (connection
//! errors, timeouts, 5xx, 429) are retried with exponential backoff; any
//! other non-success status is a rejection and is not retried.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use cdcrelay_core::bus::{FanoutBus, PublishRequest, PublishResponse};
use cdcrelay_core::envelope::FanoutEnvelope;
use cdcrelay_core::error::TransportError;
use cdcrelay_core::retry::{RetryConfig, RetryPolicy};

static SHARED: OnceLock<Arc<HttpFanoutBus>> = OnceLock::new();

/// Configuration for `HttpFanoutBus`.
#[derive(Debug, Clone)]
pub struct HttpBusConfig {
    pub retry: RetryConfig,
    pub request_timeout: Duration,
}

impl Default for HttpBusConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct HttpFanoutBus {
    endpoint: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl HttpFanoutBus {
    pub fn new(endpoint: impl Into<String>, config: HttpBusConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            http,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
        })
    }

    /// The process-wide client, built on first use and reused afterwards.
    ///
    /// Later calls return the first instance regardless of their arguments.
    pub fn shared(endpoint: &str, config: HttpBusConfig) -> Result<Arc<Self>, TransportError> {
        if let Some(bus) = SHARED.get() {
            return Ok(bus.clone());
        }
        let bus = Arc::new(Self::new(endpoint, config)?);
        Ok(SHARED.get_or_init(|| bus).clone())
    }

    async fn send_once(&self, req: &PublishRequest) -> Result<String, TransportError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .json(req)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(TransportError::Http(format!("HTTP {}: {body}", status.as_u16())));
            }
            return Err(TransportError::Rejected {
                endpoint: self.endpoint.clone(),
                reason: format!("HTTP {}: {body}", status.as_u16()),
            });
        }

        let published: PublishResponse = resp.json().await.map_err(|e| self.classify(e))?;
        Ok(published.message_id)
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else if e.is_decode() {
            TransportError::Other(format!("invalid publish response: {e}"))
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl FanoutBus for HttpFanoutBus {
    async fn publish(&self, topic: &str, envelope: &FanoutEnvelope) -> Result<String, TransportError> {
        let req = PublishRequest::new(topic, envelope);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(&req).await {
                Ok(message_id) => return Ok(message_id),
                Err(e) if e.is_retryable() => match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            subject = %envelope.subject,
                            "retrying publish"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::error!(attempt, error = %e, subject = %envelope.subject, "publish retries exhausted");
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
