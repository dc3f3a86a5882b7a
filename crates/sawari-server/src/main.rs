//! # Sawari
//!
//! Realtime rickshaw presence and ride-request hub.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! sawari
//!
//! # Run with environment variables
//! SAWARI_PORT=8080 SAWARI_HOST=0.0.0.0 sawari
//! ```

use anyhow::Result;
use sawari_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sawari=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting Sawari hub on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
