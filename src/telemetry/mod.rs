pub mod event_log;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sets up the tracing subscriber for operational diagnostics. The
/// per-request event log (see [`event_log`]) is separate: it is part of the
/// proxy's observable behavior, not debug output.
pub fn init_telemetry() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "palisade=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
