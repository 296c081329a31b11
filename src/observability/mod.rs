//! Observability for the quota engine.
//!
//! Structured logging goes through `tracing`; counters live in [`QuotaMetrics`].
//!
//! Enable the `logging` feature for a ready-made console subscriber:
//!
//! ```toml
//! tier-quota = { version = "0.1", features = ["logging"] }
//! ```
//!
//! ```rust,ignore
//! tier_quota::observability::init_tracing("tier_quota=debug");
//! ```

mod metrics;
mod spans;

pub use metrics::{Counter, Gauge, MetricsSummary, QuotaMetrics};
pub use spans::{SpanContext, TimedSpan};

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to `default_directive`.
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "logging")]
pub fn init_tracing(default_directive: &str) -> bool {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
