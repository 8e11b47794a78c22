//! Mailbox-to-Telegram notification bridge
//!
//! Watches one IMAP mailbox and notifies every subscribed Telegram chat
//! when new mail arrives. Chats subscribe with `/start` and leave with
//! `/stop`; subscriptions are persisted to a membership log so they
//! survive restarts.
//!
//! # Example
//!
//! ```no_run
//! use mailwatch::{Bot, Config, Registry, Telegram, Watchers};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> mailwatch::Result<()> {
//! let config = Config::from_env()?;
//! let registry = Arc::new(Registry::open(&config.storage_path)?);
//! let api = Telegram::new(&config.api_url, &config.bot_token)?;
//!
//! let watchers = Arc::new(Watchers::new(
//!     config.imap.clone(),
//!     Arc::clone(&registry),
//!     Arc::new(api.clone()),
//! ));
//! for chat_id in registry.active() {
//!     watchers.spawn(&chat_id);
//! }
//!
//! let bot = Bot::new(api, registry, watchers);
//! bot.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

mod bot;
mod config;
mod connection;
mod error;
mod mailbox;
mod notify;
mod registry;
mod telegram;
mod watcher;

pub use bot::Bot;
pub use config::{Config, ImapConfig, TlsMode};
pub use error::{Error, Result};
pub use mailbox::MailSession;
pub use notify::{Notifier, TextFormat};
pub use registry::Registry;
pub use telegram::{Chat, DEFAULT_API_URL, IncomingMessage, Telegram, Update};
pub use watcher::{DEFAULT_POLL_INTERVAL, RetryPolicy, Watchers};
