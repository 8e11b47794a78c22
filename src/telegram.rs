//! Telegram Bot API client
//!
//! Thin wrapper over the two Bot API methods the bridge consumes:
//! `getUpdates` for incoming commands and `sendMessage` for notices.

use crate::error::{Error, Result};
use crate::notify::{Notifier, TextFormat};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Hosted Bot API endpoint
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// How long the server holds an empty `getUpdates` poll before answering
const LONG_POLL_SECS: u64 = 30;

/// Client-side ceiling; must exceed the long-poll hold time
const HTTP_TIMEOUT: Duration = Duration::from_secs(50);

/// Telegram Bot API client
#[derive(Clone)]
pub struct Telegram {
    http: reqwest::Client,
    /// `{api_url}/bot{token}`, ready for method names to be appended
    base: String,
}

impl Telegram {
    /// Create a client for the bot identified by `token`
    ///
    /// `api_url` is the Bot API base, [`DEFAULT_API_URL`] outside of
    /// tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Api(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base: format!("{}/bot{token}", api_url.trim_end_matches('/')),
        })
    }

    /// POST one Bot API method and unwrap the response envelope
    async fn call<R: DeserializeOwned>(&self, method: &str, payload: &impl Serialize) -> Result<R> {
        let url = format!("{}/{method}", self.base);
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Api(format!("{method} request failed: {e}")))?;

        let envelope: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| Error::Api(format!("{method} returned malformed JSON: {e}")))?;

        if envelope.ok {
            envelope
                .result
                .ok_or_else(|| Error::Api(format!("{method} returned no result")))
        } else {
            let description = envelope
                .description
                .unwrap_or_else(|| "no description".to_string());
            Err(Error::Api(format!("{method} rejected: {description}")))
        }
    }

    /// Long-poll for updates newer than `offset`
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API rejects it
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: LONG_POLL_SECS,
            },
        )
        .await
    }

    /// Send a message to `chat_id`
    ///
    /// `keyboard` attaches a reply keyboard with one button per entry;
    /// the keyboard collapses after its first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the API rejects it
    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        format: TextFormat,
        keyboard: Option<&[&str]>,
    ) -> Result<()> {
        let message = SendMessage {
            chat_id,
            text,
            parse_mode: match format {
                TextFormat::Plain => None,
                TextFormat::Rich => Some("HTML"),
            },
            reply_markup: keyboard.map(|buttons| ReplyKeyboardMarkup {
                keyboard: vec![
                    buttons
                        .iter()
                        .map(|&text| KeyboardButton {
                            text: text.to_string(),
                        })
                        .collect(),
                ],
                one_time_keyboard: true,
            }),
        };

        let _: serde_json::Value = self.call("sendMessage", &message).await?;
        debug!(chat_id, "message sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for Telegram {
    async fn notify(&self, recipient: &str, text: &str, format: TextFormat) -> Result<()> {
        self.send_message(recipient, text, format, None).await
    }
}

/// Response envelope every Bot API method answers with
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
}

/// One incoming event from `getUpdates`
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update id, confirmed by passing `id + 1` as the next
    /// poll offset
    pub update_id: i64,
    /// The message, if this update carries one
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

/// An incoming chat message
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Chat the message was sent in
    pub chat: Chat,
    /// Text body, absent for stickers, photos and the like
    #[serde(default)]
    pub text: Option<String>,
}

/// The chat a message belongs to
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Unique chat id
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct ReplyKeyboardMarkup {
    keyboard: Vec<Vec<KeyboardButton>>,
    one_time_keyboard: bool,
}

#[derive(Debug, Serialize)]
struct KeyboardButton {
    text: String,
}
