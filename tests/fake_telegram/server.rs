//! In-process fake Telegram Bot API server.
//!
//! A minimal HTTP/1.1 endpoint backing the two Bot API methods the
//! bridge calls. `getUpdates` drains a queue of scripted updates;
//! `sendMessage` records the payload and hands it to the waiting test
//! through a channel. One request per connection, `Connection: close`,
//! plain HTTP so no certificates are involved.

use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// A message captured from a `sendMessage` call.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub parse_mode: Option<String>,
    pub has_keyboard: bool,
}

struct Shared {
    updates: Mutex<VecDeque<Value>>,
    sent: Mutex<Vec<SentMessage>>,
    sent_tx: mpsc::UnboundedSender<SentMessage>,
}

/// A fake Bot API server on localhost with an OS-assigned port.
///
/// Runs until dropped. The bot token in request paths is ignored.
pub struct FakeTelegramServer {
    port: u16,
    shared: Arc<Shared>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SentMessage>>,
    next_update_id: AtomicI64,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeTelegramServer {
    /// Start a fake Bot API server with an empty update queue.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            updates: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            sent_tx,
        });
        let server_shared = Arc::clone(&shared);

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let shared = Arc::clone(&server_shared);
                tokio::spawn(async move {
                    handle_request(stream, &shared).await;
                });
            }
        });

        Self {
            port,
            shared,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
            next_update_id: AtomicI64::new(1),
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Base URL to hand to the client under test.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Queue a text message from `chat_id` for the next `getUpdates`.
    pub fn push_text(&self, chat_id: i64, text: &str) {
        let update_id = self.next_update_id.fetch_add(1, Ordering::Relaxed);
        let update = json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id,
                "chat": {"id": chat_id, "type": "private"},
                "text": text,
            },
        });
        self.shared.updates.lock().unwrap().push_back(update);
    }

    /// Queue an update that carries no message at all.
    pub fn push_empty_update(&self) {
        let update_id = self.next_update_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .updates
            .lock()
            .unwrap()
            .push_back(json!({ "update_id": update_id }));
    }

    /// Wait for the next captured `sendMessage`.
    pub async fn recv_sent(&self) -> Option<SentMessage> {
        self.sent_rx.lock().await.recv().await
    }

    /// Snapshot of every message sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.shared.sent.lock().unwrap().clone()
    }
}

/// Read one HTTP request, answer it, and close the connection.
async fn handle_request(stream: TcpStream, shared: &Shared) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if matches!(reader.read_line(&mut request_line).await, Ok(0) | Err(_)) {
        return;
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();

    // headers; only Content-Length matters
    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let header = header.trim();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    // the path is "/bot{token}/{method}"
    let method = path.rsplit('/').next().unwrap_or("");
    let response = match method {
        "getUpdates" => get_updates(shared).await,
        "sendMessage" => send_message(shared, &payload),
        _ => json!({"ok": false, "description": format!("unknown method {method}")}),
    };

    let body = response.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         content-type: application/json\r\n\
         content-length: {}\r\n\
         connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    );
    let _ = reader.get_mut().write_all(response.as_bytes()).await;
    let _ = reader.get_mut().flush().await;
}

/// Drain queued updates, holding the poll briefly when none are queued
/// so an idle client is not answered in a tight loop.
async fn get_updates(shared: &Shared) -> Value {
    for _ in 0..10 {
        let batch: Vec<Value> = {
            let mut updates = shared.updates.lock().unwrap();
            updates.drain(..).collect()
        };
        if !batch.is_empty() {
            return json!({"ok": true, "result": batch});
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    json!({"ok": true, "result": []})
}

fn send_message(shared: &Shared, payload: &Value) -> Value {
    let sent = SentMessage {
        chat_id: payload["chat_id"].as_str().unwrap_or_default().to_string(),
        text: payload["text"].as_str().unwrap_or_default().to_string(),
        parse_mode: payload["parse_mode"].as_str().map(ToString::to_string),
        has_keyboard: payload.get("reply_markup").is_some(),
    };
    shared.sent.lock().unwrap().push(sent.clone());
    let _ = shared.sent_tx.send(sent);
    json!({"ok": true, "result": {"message_id": 1}})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_updates_drains_the_queue() {
        let server = FakeTelegramServer::start().await;
        server.push_text(7, "/start");

        let response: Value = reqwest::Client::new()
            .post(format!("{}/botTEST/getUpdates", server.url()))
            .json(&json!({"timeout": 0}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(response["ok"], true);
        assert_eq!(response["result"][0]["message"]["text"], "/start");
        assert_eq!(response["result"][0]["message"]["chat"]["id"], 7);
    }

    #[tokio::test]
    async fn send_message_is_captured() {
        let server = FakeTelegramServer::start().await;

        let response: Value = reqwest::Client::new()
            .post(format!("{}/botTEST/sendMessage", server.url()))
            .json(&json!({"chat_id": "7", "text": "hi", "parse_mode": "HTML"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response["ok"], true);

        let sent = server.recv_sent().await.unwrap();
        assert_eq!(sent.chat_id, "7");
        assert_eq!(sent.text, "hi");
        assert_eq!(sent.parse_mode.as_deref(), Some("HTML"));
        assert!(!sent.has_keyboard);
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let server = FakeTelegramServer::start().await;

        let response: Value = reqwest::Client::new()
            .post(format!("{}/botTEST/deleteMessage", server.url()))
            .json(&json!({}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(response["ok"], false);
    }
}
