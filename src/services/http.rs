//! HTTP client with bounded retry and exponential backoff.
//!
//! Every call starts its own attempt counter; there is no circuit breaker.
//! Callers decide what to do once a call gives up with `UpstreamUnavailable`.

use std::time::Duration;

use crate::config::ApiSettings;
use crate::errors::SourceError;

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Timeout for each individual attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_settings(api: &ApiSettings) -> Self {
        Self {
            max_retries: api.max_retries,
            base_delay: api.retry_delay,
            timeout: api.timeout,
        }
    }

    /// Sleep before retry `k` (1-based): `base_delay * 2^(k-1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// A response payload plus the backoff delays slept to obtain it.
#[derive(Debug, Clone)]
pub struct Traced<T> {
    pub payload: T,
    pub delays: Vec<Duration>,
}

/// Outbound HTTP with retries. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RetryingHttpClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl RetryingHttpClient {
    pub fn new(policy: RetryPolicy, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client, policy }
    }

    pub fn from_settings(api: &ApiSettings) -> Self {
        Self::new(RetryPolicy::from_settings(api), &api.user_agent)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// GET `url` and decode the body as JSON.
    pub async fn request(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, SourceError> {
        self.request_traced(url, params).await.map(|t| t.payload)
    }

    /// Like [`request`](Self::request), also returning the backoff delays.
    ///
    /// A body that is not JSON is `Malformed` and is not retried.
    pub async fn request_traced(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Traced<serde_json::Value>, SourceError> {
        let traced = self.fetch_with_retry(url, params).await?;
        let payload = serde_json::from_str(&traced.payload).map_err(|e| {
            SourceError::Malformed(format!("{} returned invalid JSON: {}", url, e))
        })?;
        Ok(Traced {
            payload,
            delays: traced.delays,
        })
    }

    /// GET `url` and return the body as text (HTML pages).
    pub async fn request_text(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<String, SourceError> {
        self.fetch_with_retry(url, params).await.map(|t| t.payload)
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Traced<String>, SourceError> {
        let mut delays = Vec::new();
        let mut retry = 0;

        loop {
            match self.attempt(url, params).await {
                Ok(body) => {
                    return Ok(Traced {
                        payload: body,
                        delays,
                    })
                }
                Err(last_error) if retry >= self.policy.max_retries => {
                    tracing::error!(
                        "Giving up on {} after {} attempt(s): {}",
                        url,
                        retry + 1,
                        last_error
                    );
                    return Err(SourceError::UpstreamUnavailable {
                        url: url.to_string(),
                        attempts: retry + 1,
                        last_error,
                    });
                }
                Err(e) => {
                    retry += 1;
                    let delay = self.policy.delay_for(retry);
                    tracing::warn!(
                        "Request to {} failed ({}), retry {}/{} in {:?}",
                        url,
                        e,
                        retry,
                        self.policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delays.push(delay);
                }
            }
        }
    }

    /// One attempt. Transport errors, timeouts and non-2xx are all `Err`.
    async fn attempt(&self, url: &str, params: &[(&str, String)]) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .query(params)
            .timeout(self.policy.timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status));
        }

        response
            .text()
            .await
            .map_err(|e| format!("body read failed: {}", e))
    }
}
