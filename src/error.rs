//! Error types for mailwatch

use thiserror::Error;

/// Errors that can occur while watching a mailbox or talking to Telegram
#[derive(Error, Debug)]
pub enum Error {
    /// IMAP protocol or connection error
    #[error("IMAP error: {0}")]
    Imap(String),

    /// TLS connection error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telegram Bot API error
    #[error("Telegram API error: {0}")]
    Api(String),

    /// Subscriber storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for mailwatch operations
pub type Result<T> = std::result::Result<T, Error>;
