use std::time::Duration;

use cc_app::cli;
use cc_app::config_loader;
use cc_app::dispatcher::Dispatcher;
use cc_app::dispatcher::Job;
use cc_app::shutdown_handler::ShutdownSignal;
use tracing::info;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli::get_config_path("config/dispatcher.toml");
    let config = config_loader::load_dispatcher_config_or_default(&config_path);

    // Keep guard alive for the whole run
    let _guard = cc_app::tracing_setup::init_with_stdout("cc_dispatcher", &config.log_dir, tracing::Level::INFO);
    info!(path = %config_path.display(), "Starting dispatcher");

    let shutdown = ShutdownSignal::new();
    shutdown.install()?;

    let dispatcher = Dispatcher::new(&config)?;
    dispatcher.start();
    dispatcher.start_stats_reporter(Duration::from_millis(config.stats_interval_ms));

    let mut accepted = 0u64;
    for index in 0..config.jobs {
        if dispatcher.submit(Job::demo(index, &config)) {
            accepted += 1;
        } else {
            warn!(index, "Job rejected, queue full");
        }
    }
    info!(accepted, total = config.jobs, "Demo jobs enqueued");

    while shutdown.is_running() && !dispatcher.is_drained(accepted) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    dispatcher.shutdown().await;

    let stats = dispatcher.stats().await;
    info!(stats = %serde_json::to_string(&stats)?, "Final dispatcher stats");

    Ok(())
}
