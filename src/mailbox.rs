//! Read-only count queries against the watched mailbox

use crate::config::ImapConfig;
use crate::connection::{self, ImapSession};
use crate::error::{Error, Result};
use tracing::debug;

/// An authenticated IMAP session used for mailbox count queries
///
/// Each watcher owns exactly one `MailSession`; sessions are never
/// shared between watchers.
pub struct MailSession {
    session: ImapSession,
}

impl MailSession {
    /// Connect and authenticate using the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or the login fails
    pub async fn connect(config: &ImapConfig) -> Result<Self> {
        let session = connection::connect(config).await?;
        Ok(Self { session })
    }

    /// Total number of messages currently in the mailbox
    ///
    /// Issues a read-only `EXAMINE` and reports its `EXISTS` count.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be examined
    pub async fn total_messages(&mut self, mailbox: &str) -> Result<u32> {
        let status = self
            .session
            .examine(mailbox)
            .await
            .map_err(|e| Error::Imap(format!("Failed to examine {mailbox}: {e}")))?;

        debug!(mailbox, exists = status.exists, "mailbox examined");
        Ok(status.exists)
    }

    /// Number of messages in the mailbox without the `\Seen` flag
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be examined or searched
    pub async fn unseen_messages(&mut self, mailbox: &str) -> Result<u32> {
        self.session
            .examine(mailbox)
            .await
            .map_err(|e| Error::Imap(format!("Failed to examine {mailbox}: {e}")))?;

        let matches = self
            .session
            .search("UNSEEN")
            .await
            .map_err(|e| Error::Imap(format!("Unseen search failed: {e}")))?;

        Ok(u32::try_from(matches.len()).unwrap_or(u32::MAX))
    }

    /// Log out and drop the connection
    ///
    /// Logout errors are ignored; the server closes the stream either way.
    pub async fn close(mut self) {
        self.session.logout().await.ok();
    }
}
