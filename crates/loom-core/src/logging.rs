//! Structured logging with `tracing`.
//!
//! Library code only emits `tracing` events; the host process decides where
//! they go by calling one of the initialisers below once at startup.
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with human-readable stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum log level to display, e.g. `"warn"` or `"loom_kernel=debug"`.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with JSON lines on stderr.
///
/// Same semantics as [`init_subscriber`].
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

/// Initialize logging from a level and format flag.
///
/// `loom_settings::LoggingSettings::init_subscriber` forwards the `logging`
/// settings section here.
pub fn init_from_config(level: &str, json: bool) {
    if json {
        init_json_subscriber(level);
    } else {
        init_subscriber(level);
    }
}
