//! tickcast server — headless market-data and prediction-dispatch service.
//!
//! Ingests NSE/BSE candles from upstream providers, merges bot forecasts and
//! streams both to WebSocket subscribers. Configuration is environment
//! driven; see `Config::from_env`.
//!
//! # Usage
//! ```sh
//! TICKCAST_WATCHLIST=INFY.NS:5m,TCS.NS:15m cargo run
//! ```

use anyhow::Result;
use std::sync::Arc;
use tickcast::application::system::Application;
use tickcast::config::Config;
use tickcast::interfaces;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("tickcast {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: providers={:?}, watchlist={} topics, bind={}",
        config.provider_order(),
        config.watchlist.len(),
        config.bind_addr
    );

    let app = Arc::new(Application::build(config).await?);
    app.start().await;
    info!("Scheduler running.");

    let router = interfaces::router(Arc::clone(&app));
    let listener = tokio::net::TcpListener::bind(&app.config.bind_addr).await?;
    info!("Listening on {}", app.config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
        })
        .await?;

    app.shutdown().await;
    info!("Bye.");
    Ok(())
}
