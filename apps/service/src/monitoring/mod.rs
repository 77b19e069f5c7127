/// Monitoring engine - probing, scheduling and failure tracking
///
/// - `checker` performs a single HTTP probe with retries
/// - `executor` fans probes out under a concurrency cap
/// - `scheduler` groups endpoints by interval and drives the timers
/// - `tracker` counts consecutive failures and decides when to alert
pub mod checker;
pub mod executor;
pub mod scheduler;
pub mod tracker;
pub mod types;

pub use checker::{Checker, HttpChecker, ProbeSettings};
pub use executor::ProbeDispatcher;
pub use scheduler::{ScheduleManager, ScheduleState};
pub use tracker::{FailureTracker, StreakChange};
pub use types::{EndpointStatus, ProbeOutcome, ProbeResult};
