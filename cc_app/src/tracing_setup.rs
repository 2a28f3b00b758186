use std::io;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

fn env_filter(default_level: Level) -> EnvFilter {
    // RUST_LOG wins over the default level
    EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy()
}

fn file_writer(app_name: &str, log_dir: &str) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let _ = std::fs::create_dir_all(log_dir);
    tracing_appender::non_blocking(tracing_appender::rolling::hourly(log_dir, format!("{app_name}.log")))
}

/// Log to an hourly rolling file only
///
/// Keep the returned guard alive for the whole program or buffered lines are lost.
pub fn init(app_name: &str, log_dir: &str, default_level: Level) -> WorkerGuard {
    let (writer, guard) = file_writer(app_name, log_dir);

    // Worker span names carry the queue worker identity, so keep targets and thread ids
    let file_layer = fmt::layer().with_writer(writer).with_target(true).with_thread_ids(true).with_line_number(true).with_ansi(false).compact();

    tracing_subscriber::registry().with(env_filter(default_level)).with(file_layer).init();
    guard
}

/// Log to the rolling file and to stdout
pub fn init_with_stdout(app_name: &str, log_dir: &str, default_level: Level) -> WorkerGuard {
    let (writer, guard) = file_writer(app_name, log_dir);

    let file_layer = fmt::layer().with_writer(writer).with_target(true).with_thread_ids(true).with_line_number(true).with_ansi(false).compact();
    let stdout_layer = fmt::layer().with_writer(io::stdout).with_target(true).with_thread_ids(true).with_ansi(true).compact();

    tracing_subscriber::registry().with(env_filter(default_level)).with(file_layer).with(stdout_layer).init();
    guard
}
