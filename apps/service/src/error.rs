use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the monitoring engine to its callers
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Endpoint {0} not found")]
    EndpointNotFound(i64),

    #[error("Schedule {0} not found")]
    ScheduleNotFound(Uuid),

    #[error("Storage operation failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl MonitorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EndpointNotFound(_) | Self::ScheduleNotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
