mod config;
mod grafana;
mod health;
mod payload;
mod pipeline;
mod reply;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ConfigStore};
use crate::grafana::GrafanaClient;
use crate::server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional TOML file; FYI_* environment variables override it
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::load(config_path.as_deref()).with_context(|| match &config_path {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load config from environment".to_string(),
    })?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Configuration loaded successfully");
    info!("  Address: {}", config.listen_address());
    info!("  Grafana: {}", config.grafana_host);
    info!("  Tags: {:?}", config.tags);
    info!("  Token check: {}", !config.token.is_empty());

    let store = Arc::new(ConfigStore::new(config_path, config));

    #[cfg(unix)]
    {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(e) = config::reload_on_hangup(store).await {
                tracing::error!("Configuration reload disabled: {:#}", e);
            }
        });
    }

    let state = AppState {
        sender: Arc::new(GrafanaClient::new(Arc::clone(&store))),
        config: store,
    };

    info!("Server is starting...");
    server::run(state).await?;

    Ok(())
}
