//! Liveness check and batch upload with bounded retry.

use std::time::Duration;

use fixity_model::{IngestRequest, IngestResponse, routes, validate_batch};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::warn;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Exponential backoff: `initial`, doubling per retry, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            initial: INITIAL_BACKOFF,
            max: MAX_BACKOFF,
        }
    }

    /// Pause before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// 408, 425, 429 and every 5xx.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429) || status.is_server_error()
}

#[derive(Debug, Clone)]
pub struct Uploader {
    client: Client,
    base_url: String,
    auth_token: String,
    max_batch_records: usize,
    policy: RetryPolicy,
}

impl Uploader {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        config.require_upload_target()?;
        let client = Client::builder()
            .timeout(Duration::from_secs_f64(config.http_timeout_sec))
            .user_agent(concat!("fixity-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            max_batch_records: config.max_batch_records,
            policy: RetryPolicy::new(config.http_retries),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_batch_records(&self) -> usize {
        self.max_batch_records
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /hello` must answer exactly `Hello`.
    pub async fn hello(&self) -> Result<()> {
        let url = self.url(routes::HELLO);
        let response = self
            .send_with_retry("hello", || self.client.get(&url))
            .await?;
        let status = response.status();
        let body = response.text().await.map_err(|e| AgentError::Transient {
            attempts: 1,
            message: format!("reading hello body: {e}"),
        })?;
        if body != routes::HELLO_BODY {
            return Err(AgentError::Http {
                status: status.as_u16(),
                body: format!("unexpected hello body {body:?}"),
            });
        }
        Ok(())
    }

    /// Validate locally, then post one batch.
    pub async fn upload_batch(&self, request: &IngestRequest) -> Result<IngestResponse> {
        validate_batch(&request.records, Some(self.max_batch_records))?;

        let url = self.url(routes::INGEST);
        let response = self
            .send_with_retry("ingest", || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.auth_token)
                    .json(request)
            })
            .await?;
        let status = response.status();
        response
            .json::<IngestResponse>()
            .await
            .map_err(|e| AgentError::Http {
                status: status.as_u16(),
                body: format!("invalid ingest response: {e}"),
            })
    }

    async fn send_with_retry<F>(&self, operation: &'static str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry = 0;
        loop {
            let failure = match build().send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    return Err(AgentError::Auth);
                }
                Ok(response) if is_retryable_status(response.status()) => {
                    format!("HTTP {}", response.status())
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AgentError::Http { status, body });
                }
                Err(err) if err.is_builder() => {
                    return Err(AgentError::Config(format!("{operation} request: {err}")));
                }
                Err(err) => err.to_string(),
            };

            if retry >= self.policy.retries {
                return Err(AgentError::Transient {
                    attempts: retry + 1,
                    message: failure,
                });
            }
            let delay = self.policy.delay(retry);
            warn!(
                operation,
                attempt = retry + 1,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "request failed; retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
