//! Chat relay - Main entry point.

use anyhow::Result;
use relay_common::config::Config;
use relay_common::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    // Load and validate configuration; warnings go to a stderr bootstrap logger
    let config = logging::with_bootstrap(Config::load_and_validate)?;

    // Initialize logging
    logging::init_from_config(&config.observability);

    tracing::info!("Chat Relay v{}", env!("CARGO_PKG_VERSION"));

    let app = match relay_server::build_app(&config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return Err(e);
        }
    };

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    relay_server::serve(app, config.bind_addr()?).await
}
