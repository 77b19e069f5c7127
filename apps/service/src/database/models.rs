use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::monitoring::types::{EndpointStatus, ProbeOutcome, ProbeResult};

/// Endpoint model - a URL monitored at a fixed interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    /// Opaque identifier of the user that registered the endpoint
    pub owner: Option<String>,
    pub url: String,
    pub interval_seconds: u64,
    pub status: EndpointStatus,
    pub last_checked: Option<DateTime<Utc>>,
    /// `None` means the endpoint never expires
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Expired once the expiry time is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn is_owned_by(&self, owner: Option<&str>) -> bool {
        match owner {
            Some(owner) => self.owner.as_deref() == Some(owner),
            None => true,
        }
    }
}

/// Fields supplied when registering a new endpoint; storage assigns the id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEndpoint {
    #[serde(default)]
    pub owner: Option<String>,
    pub url: String,
    #[serde(alias = "interval")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewEndpoint {
    pub fn new(url: impl Into<String>, interval_seconds: u64) -> Self {
        Self { owner: None, url: url.into(), interval_seconds, expires_at: None }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Materialise the stored record once storage has assigned an id
    pub fn into_endpoint(self, id: i64, now: DateTime<Utc>) -> Endpoint {
        Endpoint {
            id,
            owner: self.owner,
            url: self.url,
            interval_seconds: self.interval_seconds,
            status: EndpointStatus::Unknown,
            last_checked: None,
            expires_at: self.expires_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of an endpoint; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "interval")]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Clears any expiry; wins over `expires_at`
    #[serde(default)]
    pub never_expires: bool,
}

impl EndpointUpdate {
    pub fn interval(interval_seconds: u64) -> Self {
        Self { interval_seconds: Some(interval_seconds), ..Self::default() }
    }

    pub fn expiry(expires_at: DateTime<Utc>) -> Self {
        Self { expires_at: Some(expires_at), ..Self::default() }
    }

    /// Produce the updated copy of `endpoint`
    pub fn apply_to(&self, endpoint: &Endpoint, now: DateTime<Utc>) -> Endpoint {
        let mut updated = endpoint.clone();
        if let Some(url) = &self.url {
            updated.url = url.clone();
        }
        if let Some(interval_seconds) = self.interval_seconds {
            updated.interval_seconds = interval_seconds;
        }
        if self.never_expires {
            updated.expires_at = None;
        } else if let Some(expires_at) = self.expires_at {
            updated.expires_at = Some(expires_at);
        }
        updated.updated_at = now;
        updated
    }
}

/// Schedule model - endpoints sharing one check interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub interval_seconds: u64,
    /// Member endpoint ids; ordering carries no meaning
    pub endpoint_ids: BTreeSet<i64>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(interval_seconds: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: Self::default_name(interval_seconds),
            interval_seconds,
            endpoint_ids: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }

    pub fn default_name(interval_seconds: u64) -> String {
        format!("Schedule for {interval_seconds} second interval")
    }
}

/// HealthCheck model - one persisted probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub id: i64,
    pub endpoint_id: i64,
    pub outcome: ProbeOutcome,
    pub status_code: Option<u16>,
    pub response: String,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheck {
    pub fn from_probe_result(id: i64, result: &ProbeResult) -> Self {
        Self {
            id,
            endpoint_id: result.endpoint_id,
            outcome: result.outcome,
            status_code: result.status_code,
            response: result.response.clone(),
            checked_at: result.checked_at,
        }
    }
}

/// Convert a timestamp to unix seconds for storage
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert stored unix seconds back to a timestamp
pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn endpoint(expires_at: Option<DateTime<Utc>>) -> Endpoint {
        NewEndpoint { expires_at, ..NewEndpoint::new("http://ok", 5) }.into_endpoint(1, Utc::now())
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        assert!(!endpoint(None).is_expired(now));
        assert!(endpoint(Some(now)).is_expired(now));
        assert!(endpoint(Some(now - Duration::seconds(1))).is_expired(now));
        assert!(!endpoint(Some(now + Duration::seconds(1))).is_expired(now));
    }

    #[test]
    fn update_leaves_absent_fields() {
        let now = Utc::now();
        let original = endpoint(Some(now));
        let updated = EndpointUpdate::interval(60).apply_to(&original, now);
        assert_eq!(updated.interval_seconds, 60);
        assert_eq!(updated.url, original.url);
        assert_eq!(updated.expires_at, original.expires_at);

        let cleared = EndpointUpdate { never_expires: true, expires_at: Some(now), ..Default::default() }
            .apply_to(&original, now);
        assert_eq!(cleared.expires_at, None);
    }

    #[test]
    fn ownership_scoping() {
        let mut e = endpoint(None);
        assert!(e.is_owned_by(None));
        assert!(!e.is_owned_by(Some("alice")));
        e.owner = Some("alice".into());
        assert!(e.is_owned_by(Some("alice")));
        assert!(!e.is_owned_by(Some("bob")));
    }

    #[test]
    fn unix_seconds_conversion() {
        let t = i64_to_timestamp(1_700_000_000);
        assert_eq!(timestamp_to_i64(t), 1_700_000_000);
    }
}
