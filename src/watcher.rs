//! Per-subscriber mailbox watching

use crate::config::ImapConfig;
use crate::error::{Error, Result};
use crate::mailbox::MailSession;
use crate::notify::{Notifier, TextFormat};
use crate::registry::Registry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default delay between successive mailbox polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Sent once when the initial mailbox sign-in fails
const SIGNIN_FAILED_NOTICE: &str =
    "⚠️ I couldn't sign in to the mailbox, so I'm not watching it. Send /start to try again.";

/// Sent once when the mailbox stays unreachable past the retry budget
const CONNECTION_LOST_NOTICE: &str =
    "⚠️ I lost the mailbox connection and stopped watching. Send /start to resume.";

/// Bounded reconnect-and-retry policy for failing mailbox queries
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt
    pub retries: u32,
    /// Delay before the first retry
    pub first_delay: Duration,
    /// Multiplicative delay growth per retry
    pub factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            first_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based):
    /// `first_delay * factor^attempt`, clamped to `max_delay`
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let unclamped = self.first_delay.as_secs_f64() * self.factor.powi(exponent);
        let max = self.max_delay.as_secs_f64();

        if unclamped.is_finite() && unclamped >= 0.0 && unclamped < max {
            Duration::from_secs_f64(unclamped)
        } else {
            self.max_delay
        }
    }
}

/// Owns one watcher task per subscribed chat
///
/// Spawned watchers stop when their chat unsubscribes, when
/// [`Watchers::stop`] cancels them, or when the mailbox stays
/// unreachable past the retry budget.
pub struct Watchers {
    imap: ImapConfig,
    registry: Arc<Registry>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    retry: RetryPolicy,
    tasks: Arc<Mutex<HashMap<String, Handle>>>,
    root: CancellationToken,
    generations: AtomicU64,
}

struct Handle {
    /// Distinguishes this spawn from a later respawn for the same chat,
    /// so a finished task only removes its own entry
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl Watchers {
    /// Create an empty watcher set
    ///
    /// Watchers poll every [`DEFAULT_POLL_INTERVAL`] and retry with
    /// [`RetryPolicy::default`] unless overridden.
    #[must_use]
    pub fn new(imap: ImapConfig, registry: Arc<Registry>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            imap,
            registry,
            notifier,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            root: CancellationToken::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Override the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the retry policy
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Spawn a watcher task for `chat_id`, replacing any earlier one
    pub fn spawn(&self, chat_id: &str) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();

        let task = WatchTask {
            chat_id: chat_id.to_string(),
            imap: self.imap.clone(),
            poll_interval: self.poll_interval,
            retry: self.retry,
            registry: Arc::clone(&self.registry),
            notifier: Arc::clone(&self.notifier),
            cancel: cancel.clone(),
        };

        let tasks = Arc::clone(&self.tasks);
        let id = chat_id.to_string();

        // the task's cleanup takes the tasks lock, so spawning while
        // holding it keeps this insert ahead of any removal
        let stale = {
            let mut guard = self.lock_tasks();
            let join = tokio::spawn(async move {
                task.run().await;

                // drop our own entry unless a respawn already replaced it
                let mut tasks = tasks.lock().unwrap_or_else(PoisonError::into_inner);
                if tasks
                    .get(&id)
                    .is_some_and(|handle| handle.generation == generation)
                {
                    tasks.remove(&id);
                }
            });
            guard.insert(
                chat_id.to_string(),
                Handle {
                    generation,
                    cancel,
                    join,
                },
            )
        };
        if let Some(stale) = stale {
            // a watcher for this chat is still winding down
            stale.cancel.cancel();
        }
    }

    /// Cancel and forget the watcher for `chat_id`, if one is running
    pub fn stop(&self, chat_id: &str) {
        let handle = self.lock_tasks().remove(chat_id);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            debug!(chat_id, "watcher cancelled");
        }
    }

    /// Cancel every watcher and wait for their sessions to close
    pub async fn shutdown(&self) {
        let handles: Vec<Handle> = {
            let mut tasks = self.lock_tasks();
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        self.root.cancel();
        for handle in handles {
            let _ = handle.join.await;
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<String, Handle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Copy)]
enum Query {
    Total,
    Unseen,
}

/// State owned by one watcher task
struct WatchTask {
    chat_id: String,
    imap: ImapConfig,
    poll_interval: Duration,
    retry: RetryPolicy,
    registry: Arc<Registry>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
}

impl WatchTask {
    async fn run(self) {
        info!(chat_id = %self.chat_id, "watcher starting");

        let mut session = match MailSession::connect(&self.imap).await {
            Ok(session) => session,
            Err(e) => {
                warn!(chat_id = %self.chat_id, "mailbox sign-in failed: {e}");
                self.send(SIGNIN_FAILED_NOTICE).await;
                self.deactivate();
                return;
            }
        };

        // None until the first successful poll; the first poll reports
        // the unseen count instead of comparing totals
        let mut last_count: Option<u32> = None;

        loop {
            if self.cancel.is_cancelled() || !self.registry.is_active(&self.chat_id) {
                break;
            }

            let total = match self.query_with_retry(&mut session, Query::Total).await {
                Ok(total) => total,
                Err(e) => {
                    self.give_up(&e).await;
                    break;
                }
            };

            match last_count {
                None => {
                    let unseen = match self.query_with_retry(&mut session, Query::Unseen).await {
                        Ok(unseen) => unseen,
                        Err(e) => {
                            self.give_up(&e).await;
                            break;
                        }
                    };
                    self.send(&format!("✉️ Now you have <b>{unseen}</b> unseen messages."))
                        .await;
                    last_count = Some(total);
                }
                Some(last) if total > last => {
                    info!(chat_id = %self.chat_id, total, last, "mailbox grew");
                    self.send("📩 New message!").await;
                    last_count = Some(total);
                }
                Some(last) if total < last => {
                    debug!(chat_id = %self.chat_id, total, last, "mailbox shrank");
                    last_count = Some(total);
                }
                Some(_) => {}
            }

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        session.close().await;
        info!(chat_id = %self.chat_id, "watcher stopped");
    }

    /// Run one count query, reconnecting and retrying per the policy
    async fn query_with_retry(&self, session: &mut MailSession, query: Query) -> Result<u32> {
        let mut attempt = 0;
        loop {
            let result = match query {
                Query::Total => session.total_messages(&self.imap.mailbox).await,
                Query::Unseen => session.unseen_messages(&self.imap.mailbox).await,
            };

            let error = match result {
                Ok(count) => return Ok(count),
                Err(error) => error,
            };
            if attempt >= self.retry.retries {
                return Err(error);
            }

            let delay = self.retry.delay(attempt);
            warn!(
                chat_id = %self.chat_id,
                attempt,
                "mail query failed, retrying in {delay:?}: {error}"
            );
            tokio::select! {
                () = self.cancel.cancelled() => return Err(error),
                () = tokio::time::sleep(delay) => {}
            }

            // the session may be dead; replace it before the next try
            if let Ok(fresh) = MailSession::connect(&self.imap).await {
                *session = fresh;
            }
            attempt += 1;
        }
    }

    /// Terminal failure: tell the subscriber once and deactivate them,
    /// unless the watcher was stopped while it retried
    async fn give_up(&self, error: &Error) {
        if self.cancel.is_cancelled() || !self.registry.is_active(&self.chat_id) {
            return;
        }
        warn!(chat_id = %self.chat_id, "mailbox unreachable, giving up: {error}");
        self.send(CONNECTION_LOST_NOTICE).await;
        self.deactivate();
    }

    /// Best-effort notification; failures are logged and never change
    /// watcher state
    async fn send(&self, text: &str) {
        if let Err(e) = self
            .notifier
            .notify(&self.chat_id, text, TextFormat::Rich)
            .await
        {
            warn!(chat_id = %self.chat_id, "notification failed: {e}");
        }
    }

    /// Drop the subscriber so the active set keeps matching the set of
    /// live watchers
    fn deactivate(&self) {
        if self.registry.unsubscribe(&self.chat_id) {
            info!(chat_id = %self.chat_id, "subscriber deactivated after watcher failure");
        }
    }
}
