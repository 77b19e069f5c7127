use url::Url;

use crate::error::{MonitorError, MonitorResult};

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }

    pub fn into_result(self) -> MonitorResult<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(MonitorError::Validation(
                self.error.unwrap_or_else(|| "Validation failed".to_string()),
            ))
        }
    }
}

/// Validate an endpoint URL: absolute, http or https, with a host
pub fn validate_endpoint_url(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("URL cannot be empty");
    }

    match Url::parse(target) {
        Ok(url) => {
            let scheme = url.scheme();
            if scheme != "http" && scheme != "https" {
                return ValidationResult::err(format!(
                    "Invalid scheme '{scheme}'. Must be http or https"
                ));
            }

            if url.host_str().is_none_or(str::is_empty) {
                return ValidationResult::err("URL must have a valid host");
            }

            ValidationResult::ok()
        }
        Err(e) => {
            if !target.contains("://") {
                ValidationResult::err("URL must include scheme (http:// or https://)")
            } else {
                ValidationResult::err(format!("Invalid URL: {e}"))
            }
        }
    }
}

/// Longest accepted check interval: one year
pub const MAX_INTERVAL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Validate a check interval in seconds
pub fn validate_interval(interval: u64) -> ValidationResult {
    if interval == 0 {
        return ValidationResult::err("Interval must be at least 1 second");
    }

    if interval > MAX_INTERVAL_SECONDS {
        return ValidationResult::err(format!(
            "Interval too long (max {MAX_INTERVAL_SECONDS} seconds)"
        ));
    }

    ValidationResult::ok()
}

/// Validate a schedule label
pub fn validate_schedule_name(name: &str) -> ValidationResult {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return ValidationResult::err("Name cannot be empty");
    }

    if trimmed.len() > 100 {
        return ValidationResult::err("Name too long (max 100 characters)");
    }

    ValidationResult::ok()
}
