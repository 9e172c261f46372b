//! Structured logging setup
//!
//! Library code only emits `tracing` events. Binaries and tests choose the
//! subscriber with one of the functions below.

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const DEFAULT_FILTER: &str = "meshwork_core=info,meshwork=info";

/// Install a global fmt subscriber filtered by `RUST_LOG`, or by `default`
/// when the variable is unset or invalid. Fails if a subscriber is already set.
pub fn init_tracing(default: Option<&str>) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default.unwrap_or(DEFAULT_FILTER)));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    Registry::default().with(env_filter).with(fmt_layer).try_init()
}

/// Compact output captured by the test harness; repeated calls are no-ops
pub fn init_test_tracing() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meshwork_core=debug")),
        )
        .with_test_writer()
        .compact()
        .try_init();
}

/// Span wrapping one gossip round
#[inline]
pub fn gossip_span(node_id: &str, round: &str) -> Span {
    tracing::debug_span!(
        "gossip",
        node_id = %node_id,
        round = %round,
        targets = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
        let span = gossip_span("node-1", "local");
        span.record("targets", 3);
    }
}
