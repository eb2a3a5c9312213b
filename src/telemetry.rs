//! Tracing bootstrap for the service binaries.
//!
//! Filter directives come from `SYNCLINE_LOG` first, then `RUST_LOG`, and
//! default to `info`. Setting `log_format = "json"` in config switches the
//! human-readable output to newline-delimited JSON for log shippers.

use std::any::type_name_of_val;
use std::sync::OnceLock;

use log::LevelFilter;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber and the `log` facade bridge. Later calls are
/// no-ops, so binaries and test harnesses can share a process safely.
pub fn init_tracing(config: &AppConfig) {
    INSTALLED.get_or_init(|| install(config));
}

fn install(config: &AppConfig) {
    // Bridge first, so `log::` macros emitted during subscriber setup are
    // already routed through tracing.
    if LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
        .is_err()
        && !type_name_of_val(log::logger()).contains("LogTracer")
    {
        eprintln!("warning: log bridge not installed; `log::` macros will bypass tracing");
    }

    let filter = EnvFilter::try_from_env("SYNCLINE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let output = match config.log_format.as_str() {
        "json" => fmt::layer().json().boxed(),
        _ => fmt::layer().pretty().boxed(),
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init()
        .is_err()
    {
        eprintln!("warning: a tracing subscriber is already set; keeping the existing one");
    }
}
