//! # pointing-logging
//!
//! Structured logging with `tracing`.
//!
//! Components log with structured fields (`meeting_id`, `user_id`,
//! `connection_id`) and this crate installs the global subscriber that
//! renders them, either as compact text or as one JSON object per line.
//! `RUST_LOG` overrides the configured filter.

#![deny(unsafe_code)]

use pointing_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Build the filter: `RUST_LOG` if set and valid, else `level`, else `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Run `f` under a temporary stderr subscriber at `info`.
///
/// Settings are loaded before the global subscriber can be configured from
/// them; warnings emitted while loading go through this one instead.
pub fn with_bootstrap_subscriber<T>(f: impl FnOnce() -> T) -> T {
    scoped(build_filter("info"), std::io::stderr, f)
}

fn scoped<W, T>(filter: EnvFilter, writer: W, f: impl FnOnce() -> T) -> T
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(writer)
        .compact()
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Initialize the global tracing subscriber writing to stderr.
///
/// Call once at application startup. Returns `false` if a subscriber was
/// already installed (subsequent calls are no-ops).
pub fn init_subscriber(settings: &LoggingSettings) -> bool {
    let filter = build_filter(&settings.level);

    match settings.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init()
            .is_ok(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init()
            .is_ok(),
    }
}
