use std::fs;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs console output plus a daily-rotated JSON log under `log_dir`.
/// `RUST_LOG` adds to the default `asset_ingest=info` directive.
pub fn init_logging(log_dir: &Path) {
    let _ = fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, "asset_ingest.log");
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    // stdout carries command output; diagnostics go to stderr
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let filter = EnvFilter::from_default_env().add_directive("asset_ingest=info".parse().unwrap());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // Keep the writer alive for the life of the process so logs are flushed
    std::mem::forget(_guard);
}
