//! Shared tracing setup for the pingwatch binaries.

mod subscriber;

pub use subscriber::{LogFormat, init, init_with_level};

/// Install the default subscriber (`info` unless `RUST_LOG` says otherwise).
pub fn init_tracing() {
    init();
}
