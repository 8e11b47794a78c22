#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Mailbox-to-Telegram notification bridge daemon

use mailwatch::{Bot, Config, Registry, Telegram, Watchers};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let registry = Arc::new(Registry::open(&config.storage_path)?);
    let api = Telegram::new(&config.api_url, &config.bot_token)?;

    let watchers = Arc::new(
        Watchers::new(
            config.imap.clone(),
            Arc::clone(&registry),
            Arc::new(api.clone()),
        )
        .with_poll_interval(config.poll_interval),
    );

    // chats recorded before the last shutdown resume being watched
    let replayed = registry.active();
    info!(subscribers = replayed.len(), "replaying subscriptions");
    for chat_id in &replayed {
        watchers.spawn(chat_id);
    }

    let bot = Bot::new(api, Arc::clone(&registry), Arc::clone(&watchers));
    let shutdown = CancellationToken::new();

    tokio::select! {
        () = bot.run(shutdown.clone()) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }

    shutdown.cancel();
    watchers.shutdown().await;
    Ok(())
}
