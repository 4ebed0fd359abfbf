//! Tracing setup.
//!
//! Runtime-tracer semantics only: spans and events via `tracing`, with
//! redaction applied where inputs are recorded (see the adapter's
//! telemetry options).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize the subscriber. `COWORKER_LOG` overrides the default
/// `info` filter.
pub fn init() {
    let filter = EnvFilter::try_from_env("COWORKER_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
