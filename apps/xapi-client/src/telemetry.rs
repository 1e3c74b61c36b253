//! Logging Setup
//!
//! Installs the `tracing` subscriber used by the binary: an `EnvFilter`
//! (driven by `RUST_LOG`, defaulting to `info`) plus a fmt layer.
//!
//! # Usage
//!
//! ```ignore
//! xapi_client::telemetry::init();
//! tracing::info!("client starting");
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter directive when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// Call once at startup; a second call is ignored (the first subscriber
/// wins), which keeps tests that initialize logging independent.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
