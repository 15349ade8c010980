mod config;
mod dispatch;
mod phone;
mod platform;
mod salebot;
mod selftest;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::webhook::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,consent_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let have = config.required_settings();
    info!("Configuration loaded");
    info!("  Listen: {}", config.server.listen);
    info!("  Salebot API: {}", config.salebot.base_url);
    info!("  Channel id: {:?}", config.channel_id());
    info!("  Bot id: {:?}", config.bot_id());
    info!("  Template id: {:?}", config.template_id());
    info!("  Default country code: {}", config.country_code());
    if !have.all_present() {
        // requests will be answered with env_missing until this is fixed
        warn!("Required settings missing: {:?}", have);
    }

    let state = Arc::new(AppState::new(config));

    info!("Consent relay is starting...");
    webhook::run(state).await?;

    Ok(())
}
