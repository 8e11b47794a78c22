//! Configuration for the mailbox watcher and the Telegram bot

use crate::error::{Error, Result};
use crate::telegram::DEFAULT_API_URL;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// How the TLS session with the IMAP server is established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (IMAPS)
    Implicit,
    /// Plaintext greeting upgraded with STARTTLS
    StartTls,
}

impl TlsMode {
    /// Conventional IMAP port for this mode
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Implicit => 993,
            Self::StartTls => 143,
        }
    }
}

/// Configuration for connecting to the watched IMAP mailbox
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// IMAP server host
    pub host: String,
    /// IMAP server port
    pub port: u16,
    /// Account username
    pub username: String,
    /// Account password
    pub password: String,
    /// TLS establishment mode
    pub tls_mode: TlsMode,
    /// Mailbox to watch
    pub mailbox: String,
    /// Skip server certificate verification (self-signed test servers only)
    pub accept_invalid_certs: bool,
}

impl ImapConfig {
    /// Load the IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present, then from environment:
    /// - `IMAP_HOST` (required)
    /// - `IMAP_PORT` (default: 993 implicit, 143 starttls)
    /// - `IMAP_USERNAME` (required)
    /// - `IMAP_PASSWORD` (required)
    /// - `IMAP_TLS` (`implicit` or `starttls`, default: implicit)
    /// - `IMAP_MAILBOX` (default: INBOX)
    /// - `IMAP_DANGER_ACCEPT_INVALID_CERTS` (default: false)
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or a value
    /// does not parse
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let host =
            env::var("IMAP_HOST").map_err(|_| Error::Config("IMAP_HOST not set".to_string()))?;
        let username = env::var("IMAP_USERNAME")
            .map_err(|_| Error::Config("IMAP_USERNAME not set".to_string()))?;
        let password = env::var("IMAP_PASSWORD")
            .map_err(|_| Error::Config("IMAP_PASSWORD not set".to_string()))?;

        let tls_mode = match env::var("IMAP_TLS") {
            Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
                "implicit" | "tls" => TlsMode::Implicit,
                "starttls" => TlsMode::StartTls,
                other => {
                    return Err(Error::Config(format!(
                        "Invalid IMAP_TLS '{other}': expected 'implicit' or 'starttls'"
                    )));
                }
            },
            Err(_) => TlsMode::Implicit,
        };

        let port = env::var("IMAP_PORT")
            .unwrap_or_else(|_| tls_mode.default_port().to_string())
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?;

        let mailbox = env::var("IMAP_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        let accept_invalid_certs = env::var("IMAP_DANGER_ACCEPT_INVALID_CERTS")
            .is_ok_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"));

        Ok(Self {
            host,
            port,
            username,
            password,
            tls_mode,
            mailbox,
            accept_invalid_certs,
        })
    }
}

/// Full bridge configuration: mailbox access, Telegram access, storage
/// and poll cadence
#[derive(Debug, Clone)]
pub struct Config {
    /// Watched mailbox connection settings
    pub imap: ImapConfig,
    /// Telegram bot token
    pub bot_token: String,
    /// Telegram Bot API base URL
    pub api_url: String,
    /// Path of the subscriber membership log
    pub storage_path: PathBuf,
    /// Delay between successive mailbox polls
    pub poll_interval: Duration,
}

impl Config {
    /// Load the full configuration from environment variables
    ///
    /// In addition to the `IMAP_*` variables read by
    /// [`ImapConfig::from_env`]:
    /// - `TELEGRAM_BOT_TOKEN` (required)
    /// - `TELEGRAM_API_URL` (default: `https://api.telegram.org`)
    /// - `MAILWATCH_STORAGE` (default: `active_chats.storage`)
    /// - `MAILWATCH_POLL_INTERVAL_SECS` (default: 10)
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or a value
    /// does not parse
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let imap = ImapConfig::from_env()?;

        let bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| Error::Config("TELEGRAM_BOT_TOKEN not set".to_string()))?;
        let api_url =
            env::var("TELEGRAM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let storage_path = env::var("MAILWATCH_STORAGE")
            .map_or_else(|_| PathBuf::from("active_chats.storage"), PathBuf::from);

        let poll_interval = env::var("MAILWATCH_POLL_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| Error::Config(format!("Invalid MAILWATCH_POLL_INTERVAL_SECS: {e}")))?;

        Ok(Self {
            imap,
            bot_token,
            api_url,
            storage_path,
            poll_interval,
        })
    }
}
