//! omgsync binary entry point

use omgsync::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize metrics
/// 4. Initialize AppState and sign in from configuration
/// 5. Start background sync until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging
    init_tracing(&config.logging);
    tracing::info!("Starting omgsync...");

    // 3. Initialize metrics
    omgsync::metrics::init_metrics();

    tracing::info!(
        api = %config.api.base_url,
        backend = ?config.cache.backend,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config).await?;
    if !state.sign_in_from_config()? {
        tracing::warn!("No access token configured; sync stays idle until sign-in");
    }

    // 5. Run until interrupted
    state.start();
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    state.shutdown().await;

    match omgsync::metrics::render_metrics() {
        Ok(snapshot) => tracing::debug!(metrics = %snapshot, "Final metrics"),
        Err(e) => tracing::warn!(error = %e, "Failed to render metrics"),
    }

    Ok(())
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("omgsync={}", logging.level).into());

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
