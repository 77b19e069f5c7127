use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Last-known status of a monitored endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    #[default]
    Unknown,
    Ok,
    Degraded,
    Error,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointStatus::Unknown => write!(f, "unknown"),
            EndpointStatus::Ok => write!(f, "ok"),
            EndpointStatus::Degraded => write!(f, "degraded"),
            EndpointStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for EndpointStatus {
    type Err = std::convert::Infallible;

    /// Anything unrecognised reads back as `unknown`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ok" => EndpointStatus::Ok,
            "degraded" => EndpointStatus::Degraded,
            "error" => EndpointStatus::Error,
            _ => EndpointStatus::Unknown,
        })
    }
}

/// Classification of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    Ok,
    Degraded,
    Error,
}

impl ProbeOutcome {
    /// 2xx is ok, any other completed response is degraded.
    pub fn from_status_code(code: u16) -> Self {
        if (200..300).contains(&code) { ProbeOutcome::Ok } else { ProbeOutcome::Degraded }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        EndpointStatus::from(*self).fmt(f)
    }
}

impl FromStr for ProbeOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(ProbeOutcome::Ok),
            "degraded" => Ok(ProbeOutcome::Degraded),
            "error" => Ok(ProbeOutcome::Error),
            other => Err(format!("unknown probe outcome: {other}")),
        }
    }
}

impl From<ProbeOutcome> for EndpointStatus {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Ok => EndpointStatus::Ok,
            ProbeOutcome::Degraded => EndpointStatus::Degraded,
            ProbeOutcome::Error => EndpointStatus::Error,
        }
    }
}

/// Result of probing one endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Endpoint that was probed
    pub endpoint_id: i64,

    /// URL that was requested
    pub url: String,

    pub outcome: ProbeOutcome,

    /// HTTP status code, absent when no response was received
    pub status_code: Option<u16>,

    /// Response body excerpt, or the error text when the probe failed
    pub response: String,

    /// Round trip of the last attempt in milliseconds
    pub latency_ms: Option<u64>,

    /// Number of attempts made (1 when the first one got a response)
    pub attempts: u32,

    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn new(endpoint_id: i64, url: impl Into<String>) -> Self {
        Self {
            endpoint_id,
            url: url.into(),
            outcome: ProbeOutcome::Error,
            status_code: None,
            response: String::new(),
            latency_ms: None,
            attempts: 0,
            checked_at: Utc::now(),
        }
    }

    /// Mark the probe as having received a response
    pub fn completed(mut self, status_code: u16, excerpt: String, latency_ms: u64) -> Self {
        self.outcome = ProbeOutcome::from_status_code(status_code);
        self.status_code = Some(status_code);
        self.response = excerpt;
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark the probe as failed at the transport level
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.outcome = ProbeOutcome::Error;
        self.status_code = None;
        self.response = error.into();
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}
