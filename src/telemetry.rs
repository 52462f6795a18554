//! Tracing and diagnostics initialization for binaries and examples.
//!
//! Library code only emits `tracing` events; calling [`init`] from an
//! application wires up the subscriber (env-filtered fmt output plus the
//! error layer for span traces in diagnostics) and miette's panic hook.
//! Idempotent: a second call is a no-op.

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Install the global tracing subscriber and miette panic hook.
///
/// The filter honors `RUST_LOG`, defaulting to `warn,taskloom=info`.
pub fn init() {
    INIT.call_once(|| {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_span_events(FmtSpan::CLOSE);

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,taskloom=info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .with(ErrorLayer::default())
            .init();

        miette::set_panic_hook();
    });
}
