//! Endpoint liveness monitoring engine.
//!
//! Endpoints are grouped into one schedule per check interval; each schedule
//! probes its members on a timer, a failure tracker raises an alert once per
//! streak of consecutive failures, and an expiry reaper removes endpoints
//! whose lifetime has run out.

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod validation;

pub use config::Config;
pub use database::{Database, DatabaseImpl, open_local};
pub use error::{MonitorError, MonitorResult};
pub use events::{EventBus, MonitorEvent};
pub use orchestrator::{NewSchedule, Orchestrator, ScheduleUpdate};
