//! Structured logging with `tracing`.
//!
//! The bridge logs through `tracing` macros with structured fields
//! (`session`, `dialogue`, `url`, ...). Session lifecycles are wrapped in
//! spans so every line emitted while a socket is open carries its key.
//!
//! - [`init_subscriber`] installs the process-wide stderr subscriber
//! - [`capture_logs`] installs a thread-local capturing subscriber for tests

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already installed
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with JSON lines on stderr.
///
/// Intended for deployments where logs are shipped to a collector.
pub fn init_json_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .json()
        .try_init();
}
