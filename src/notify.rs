//! Notification delivery seam

use crate::error::Result;
use async_trait::async_trait;

/// Body format of an outgoing notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    /// Rendered verbatim
    Plain,
    /// Rich text; Telegram renders this as HTML
    Rich,
}

/// A channel able to deliver a text notification to a named recipient
///
/// Watchers hold the channel as `Arc<dyn Notifier>`, which keeps the
/// mailbox side independent of the Telegram transport and lets tests
/// substitute a recording implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to `recipient`
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be delivered
    async fn notify(&self, recipient: &str, text: &str, format: TextFormat) -> Result<()>;
}
