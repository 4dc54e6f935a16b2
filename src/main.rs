mod bot;
mod config;
mod context;
mod health;
mod llm;
mod platform;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::AppState;
use crate::config::Config;
use crate::llm::CompletionClient;
use crate::platform::slack::{self, SlackClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,deskbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; a missing credential aborts here with a non-zero
    // exit, before any listener binds.
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded");
    info!("  Model: {}", config.llm.model);
    info!("  Health endpoint: {}:{}", config.health.bind, config.health.port);

    // Construct the two service clients once and inject them; no globals.
    let slack_client = Arc::new(SlackClient::new(&config.slack)?);
    let completion_client = Arc::new(CompletionClient::new(config.llm.clone())?);

    let bot = slack_client
        .resolve_bot_identity()
        .await
        .context("Failed to resolve bot identity via auth.test")?;
    info!("Resolved bot user id: {}", bot.user_id);

    let state = Arc::new(AppState {
        chat: slack_client.clone(),
        llm: completion_client,
        config: config.clone(),
        bot,
    });

    // One shutdown signal shared by both tasks.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    let health_task = tokio::spawn(health::serve(
        config.health.bind.clone(),
        config.health.port,
        shutdown_rx.clone(),
    ));

    info!("Bot is starting...");
    slack::run(slack_client, state, shutdown_rx).await?;

    health_task
        .await
        .context("Liveness server task panicked")??;

    Ok(())
}
