use anyhow::Result;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use super::types::ProbeResult;
use crate::database::models::Endpoint;

/// Transport-level probe failure
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProbeError::Timeout
        } else if e.is_connect() {
            ProbeError::Connect(e.to_string())
        } else {
            ProbeError::Request(e.to_string())
        }
    }
}

/// Timeout and retry settings for HTTP probes
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub timeout: Duration,
    /// Total attempts, including the first one
    pub attempts: u32,
    pub retry_delay: Duration,
    /// Maximum number of body bytes kept in the result
    pub excerpt_bytes: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            attempts: 3,
            retry_delay: Duration::from_secs(2),
            excerpt_bytes: 512,
        }
    }
}

/// Checker trait - performs one health check against an endpoint
///
/// Implementations never fail: every failure mode is folded into the
/// returned `ProbeResult`.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeResult;
}

/// HTTP GET checker with bounded retry on transport failures
pub struct HttpChecker {
    client: reqwest::Client,
    settings: ProbeSettings,
}

impl HttpChecker {
    pub fn new(settings: ProbeSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("pingwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// One GET request; a completed response of any status is a success here.
    /// A body that breaks off or stalls before the excerpt is read counts as
    /// a transport failure.
    async fn attempt(&self, url: &str) -> Result<(u16, String, u64), ProbeError> {
        let start = Instant::now();

        let mut response = self.client.get(url).send().await?;
        let status_code = response.status().as_u16();
        let excerpt = self.read_excerpt(&mut response).await?;

        let latency = start.elapsed().as_millis() as u64;
        Ok((status_code, excerpt, latency))
    }

    /// Read at most `excerpt_bytes` of the body; the rest is never buffered
    async fn read_excerpt(&self, response: &mut reqwest::Response) -> Result<String, ProbeError> {
        let limit = self.settings.excerpt_bytes;
        let mut body = Vec::with_capacity(limit.min(8 * 1024));

        while body.len() < limit {
            let Some(chunk) = response.chunk().await? else { break };
            let take = chunk.len().min(limit - body.len());
            body.extend_from_slice(&chunk[..take]);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeResult {
        let result = ProbeResult::new(endpoint.id, endpoint.url.clone());
        let attempts = self.settings.attempts.max(1);

        let mut last_error = ProbeError::Request("no attempt made".to_string());
        for attempt in 1..=attempts {
            match self.attempt(&endpoint.url).await {
                Ok((status_code, excerpt, latency_ms)) => {
                    return result
                        .completed(status_code, excerpt, latency_ms)
                        .with_attempts(attempt);
                }
                Err(e) => {
                    if attempt < attempts {
                        debug!(
                            endpoint_id = endpoint.id,
                            url = %endpoint.url,
                            "Retry {}/{}: {}",
                            attempt,
                            attempts,
                            e
                        );
                        tokio::time::sleep(self.settings.retry_delay).await;
                    }
                    last_error = e;
                }
            }
        }

        result.failed(last_error.to_string()).with_attempts(attempts)
    }
}
