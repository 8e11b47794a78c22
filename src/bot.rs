//! Telegram command surface

use crate::notify::TextFormat;
use crate::registry::Registry;
use crate::telegram::{Telegram, Update};
use crate::watcher::Watchers;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WELCOME_NOTICE: &str = "Hello! I'm watching your mailbox now 📬";
const ALREADY_RUNNING_NOTICE: &str = "⛔️ Hey, don't mess with me, okay? I'm already running.";
const NOTHING_RUNNING_NOTICE: &str = "⛔️ Hey, you should run me first!";
const FAREWELL_NOTICE: &str = "I was glad to help you. Bye 👋";
const SUBSCRIBE_FAILED_NOTICE: &str = "⚠️ I couldn't save your subscription, please try again.";

/// Reply keyboard offered with the welcome notice
const KEYBOARD: &[&str] = &["/start", "/stop"];

/// Delay before re-polling after a failed `getUpdates`
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Commands the bot reacts to; everything else is ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
}

/// Extract the leading bot command, tolerating the `/cmd@BotName` form
fn parse_command(text: &str) -> Option<Command> {
    let first = text.split_whitespace().next()?;
    let command = first.split('@').next().unwrap_or(first);
    match command {
        "/start" => Some(Command::Start),
        "/stop" => Some(Command::Stop),
        _ => None,
    }
}

/// Dispatches incoming chat commands to the registry and the watcher set
pub struct Bot {
    api: Telegram,
    registry: Arc<Registry>,
    watchers: Arc<Watchers>,
}

impl Bot {
    /// Create the command dispatcher
    #[must_use]
    pub const fn new(api: Telegram, registry: Arc<Registry>, watchers: Arc<Watchers>) -> Self {
        Self {
            api,
            registry,
            watchers,
        }
    }

    /// Poll for updates and handle commands until `cancel` fires
    ///
    /// Failed polls are retried after a short delay; an update is
    /// confirmed (by advancing the offset) as soon as it is handled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut offset: Option<i64> = None;
        info!("command loop started");

        loop {
            let updates = tokio::select! {
                () = cancel.cancelled() => break,
                updates = self.api.get_updates(offset) => updates,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    warn!("getUpdates failed, retrying: {e}");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("command loop stopped");
    }

    async fn handle_update(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text else { return };
        let chat_id = message.chat.id.to_string();

        match parse_command(&text) {
            Some(Command::Start) => self.on_subscribe(&chat_id).await,
            Some(Command::Stop) => self.on_unsubscribe(&chat_id).await,
            None => debug!(chat_id, "ignoring non-command message"),
        }
    }

    /// `/start`: activate the chat and begin watching the mailbox for it
    async fn on_subscribe(&self, chat_id: &str) {
        if self.registry.is_active(chat_id) {
            self.notice(chat_id, ALREADY_RUNNING_NOTICE, None).await;
            return;
        }

        match self.registry.subscribe(chat_id) {
            Ok(true) => {
                info!(chat_id, "subscribed");
                self.notice(chat_id, WELCOME_NOTICE, Some(KEYBOARD)).await;
                self.watchers.spawn(chat_id);
            }
            Ok(false) => {
                // lost a race with another update for the same chat
                self.notice(chat_id, ALREADY_RUNNING_NOTICE, None).await;
            }
            Err(e) => {
                warn!(chat_id, "subscribe failed: {e}");
                self.notice(chat_id, SUBSCRIBE_FAILED_NOTICE, None).await;
            }
        }
    }

    /// `/stop`: deactivate the chat and stop its watcher
    ///
    /// A chat that never subscribed gets no reply while other chats are
    /// active.
    async fn on_unsubscribe(&self, chat_id: &str) {
        if self.registry.is_empty() {
            self.notice(chat_id, NOTHING_RUNNING_NOTICE, None).await;
            return;
        }

        if self.registry.unsubscribe(chat_id) {
            info!(chat_id, "unsubscribed");
            self.watchers.stop(chat_id);
            self.notice(chat_id, FAREWELL_NOTICE, None).await;
        }
    }

    async fn notice(&self, chat_id: &str, text: &str, keyboard: Option<&[&str]>) {
        if let Err(e) = self
            .api
            .send_message(chat_id, text, TextFormat::Rich, keyboard)
            .await
        {
            warn!(chat_id, "notice failed: {e}");
        }
    }
}
