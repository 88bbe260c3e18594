//! Tracing setup shared by the coordinator and client binaries.
//!
//! Grounded on `servers/src/server_speak.rs`'s `setup_logging`: a console
//! layer plus a daily-rolling JSON file layer, both filtered by `RUST_LOG`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber. The returned guard must be
/// held for the lifetime of the process — dropping it stops the background
/// file-writer thread and silently truncates buffered log lines.
pub fn init(log_dir: &str, file_prefix: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(true);
    let file_layer = fmt::layer().json().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
