//! Telegram Bot API adapter: `sendMessage` for delivery and `getUpdates`
//! long/short polling for inbound replies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::channel_contract::{
    ChannelCursor, ChannelError, DeliveryReceipt, InboundBatch, InboundMessage, MessageChannel,
};

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const TELEGRAM_MAX_MESSAGE_CHARS: usize = 4_000;
const TELEGRAM_MAX_RETRY_AFTER_MS: u64 = 30_000;
const TELEGRAM_ALLOWED_UPDATES: &str = r#"["message"]"#;
const ERROR_BODY_PREVIEW_CHARS: usize = 320;

#[derive(Debug, Clone)]
/// Connection settings for [`TelegramChannel`].
pub struct TelegramChannelConfig {
    pub api_base: String,
    pub bot_token: String,
    pub chat_id: String,
    pub request_timeout_ms: u64,
    pub long_poll_timeout_seconds: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl TelegramChannelConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            request_timeout_ms: 15_000,
            long_poll_timeout_seconds: 0,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Clone)]
/// [`MessageChannel`] backed by the Telegram Bot API.
pub struct TelegramChannel {
    http: reqwest::Client,
    method_base: String,
    chat_id: Value,
    long_poll_timeout_seconds: u64,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("chat_id", &self.chat_id)
            .field("long_poll_timeout_seconds", &self.long_poll_timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl TelegramChannel {
    pub fn new(config: TelegramChannelConfig) -> Result<Self, ChannelError> {
        let token = config.bot_token.trim();
        if token.is_empty() {
            return Err(ChannelError::MissingConfig(
                "telegram bot token is required".to_string(),
            ));
        }
        let chat_id = config.chat_id.trim();
        if chat_id.is_empty() {
            return Err(ChannelError::MissingConfig(
                "telegram chat id is required".to_string(),
            ));
        }
        let base = config.api_base.trim().trim_end_matches('/');
        if base.is_empty() {
            return Err(ChannelError::MissingConfig(
                "telegram api base cannot be empty".to_string(),
            ));
        }

        // Long polls hold the request open server-side; leave headroom for it.
        let timeout_ms = config
            .request_timeout_ms
            .max(1)
            .saturating_add(config.long_poll_timeout_seconds.saturating_mul(1_000));
        let http = reqwest::Client::builder()
            .user_agent("parley-telegram-channel")
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|error| ChannelError::Transport(error.without_url().to_string()))?;

        Ok(Self {
            http,
            method_base: format!("{base}/bot{token}"),
            chat_id: telegram_chat_id_value(chat_id),
            long_poll_timeout_seconds: config.long_poll_timeout_seconds,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms,
        })
    }

    async fn get_updates(
        &self,
        offset: i64,
        timeout_seconds: u64,
    ) -> Result<Vec<Value>, ChannelError> {
        let url = format!("{}/getUpdates", self.method_base);
        let offset = offset.to_string();
        let timeout = timeout_seconds.to_string();
        let response = self
            .request_json_with_retry("getUpdates", || {
                self.http.get(url.as_str()).query(&[
                    ("offset", offset.as_str()),
                    ("timeout", timeout.as_str()),
                    ("allowed_updates", TELEGRAM_ALLOWED_UPDATES),
                ])
            })
            .await?;
        response
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| ChannelError::Parse("getUpdates response missing result[]".to_string()))
    }

    async fn send_chunk(&self, text: &str) -> Result<DeliveryReceipt, ChannelError> {
        let url = format!("{}/sendMessage", self.method_base);
        let payload = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let response = self
            .request_json_with_retry("sendMessage", || {
                self.http.post(url.as_str()).json(&payload)
            })
            .await?;
        let message_id = response
            .get("result")
            .and_then(|result| result.get("message_id"))
            .and_then(value_as_id);
        Ok(DeliveryReceipt { message_id })
    }

    async fn request_json_with_retry<F>(
        &self,
        method: &str,
        build_request: F,
    ) -> Result<Value, ChannelError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let outcome = match build_request().send().await {
                Ok(response) => read_telegram_response(response).await,
                Err(error) => Err(TelegramFailure {
                    error: ChannelError::Transport(error.without_url().to_string()),
                    retry_after_ms: None,
                }),
            };
            let failure = match outcome {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };

            if attempt >= self.retry_max_attempts || !failure.error.is_retryable() {
                return Err(failure.error);
            }
            let delay_ms = failure
                .retry_after_ms
                .unwrap_or_else(|| self.retry_base_delay_ms.saturating_mul(attempt as u64));
            tracing::debug!(
                method,
                attempt,
                delay_ms,
                error = %failure.error,
                "retrying telegram request"
            );
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt, ChannelError> {
        let mut receipt = DeliveryReceipt::default();
        for chunk in split_message_chunks(text, TELEGRAM_MAX_MESSAGE_CHARS) {
            receipt = self.send_chunk(&chunk).await?;
        }
        Ok(receipt)
    }

    async fn fetch_since(
        &self,
        cursor: Option<ChannelCursor>,
    ) -> Result<InboundBatch, ChannelError> {
        let offset = cursor
            .map(|cursor| i64::try_from(cursor.value()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let updates = self
            .get_updates(offset, self.long_poll_timeout_seconds)
            .await?;
        Ok(inbound_batch_from_updates(&updates))
    }

    async fn resume_cursor(&self) -> Result<Option<ChannelCursor>, ChannelError> {
        let updates = self.get_updates(-1, 0).await?;
        Ok(inbound_batch_from_updates(&updates).next_cursor)
    }
}

struct TelegramFailure {
    error: ChannelError,
    retry_after_ms: Option<u64>,
}

async fn read_telegram_response(response: reqwest::Response) -> Result<Value, TelegramFailure> {
    let status = response.status();
    let body = response.text().await.map_err(|error| TelegramFailure {
        error: ChannelError::Transport(error.without_url().to_string()),
        retry_after_ms: None,
    })?;
    let parsed = serde_json::from_str::<Value>(&body).ok();

    if !status.is_success() {
        let retry_after_ms = parsed.as_ref().and_then(telegram_retry_after_ms);
        let description = parsed
            .as_ref()
            .and_then(|value| value.get("description"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| truncate_chars(&body, ERROR_BODY_PREVIEW_CHARS));
        let error = if status == StatusCode::CONFLICT {
            ChannelError::Api { description }
        } else {
            ChannelError::HttpStatus {
                status: status.as_u16(),
                body: description,
            }
        };
        return Err(TelegramFailure {
            error,
            retry_after_ms,
        });
    }

    let Some(parsed) = parsed else {
        return Err(TelegramFailure {
            error: ChannelError::Parse(format!(
                "response is not JSON: {}",
                truncate_chars(&body, ERROR_BODY_PREVIEW_CHARS)
            )),
            retry_after_ms: None,
        });
    };
    if parsed.get("ok").and_then(Value::as_bool) != Some(true) {
        let description = parsed
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(TelegramFailure {
            error: ChannelError::Api { description },
            retry_after_ms: None,
        });
    }
    Ok(parsed)
}

fn telegram_retry_after_ms(value: &Value) -> Option<u64> {
    value
        .get("parameters")
        .and_then(|parameters| parameters.get("retry_after"))
        .and_then(Value::as_u64)
        .map(|seconds| {
            seconds
                .saturating_mul(1_000)
                .min(TELEGRAM_MAX_RETRY_AFTER_MS)
        })
}

/// Numeric chat ids go over the wire as integers; `@channelname` stays a string.
fn telegram_chat_id_value(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

/// Converts a `getUpdates` result into an [`InboundBatch`]. Every update moves
/// the cursor, including ones that carry no text message.
pub fn inbound_batch_from_updates(updates: &[Value]) -> InboundBatch {
    let mut next_offset: Option<u64> = None;
    let mut messages = Vec::new();
    for update in updates {
        if let Some(update_id) = update.get("update_id").and_then(Value::as_u64) {
            let candidate = update_id.saturating_add(1);
            next_offset = Some(next_offset.map_or(candidate, |current| current.max(candidate)));
        }
        if let Some(message) = update.get("message").and_then(inbound_message_from_telegram) {
            messages.push(message);
        }
    }
    InboundBatch {
        messages,
        next_cursor: next_offset.map(ChannelCursor),
    }
}

fn inbound_message_from_telegram(message: &Value) -> Option<InboundMessage> {
    let message_id = message.get("message_id").and_then(value_as_id)?;
    let conversation_id = message
        .get("chat")
        .and_then(|chat| chat.get("id"))
        .and_then(value_as_id)?;
    let sender = message.get("from");
    Some(InboundMessage {
        message_id,
        conversation_id,
        sender_id: sender.and_then(|from| from.get("id")).and_then(value_as_id),
        sender_username: sender
            .and_then(|from| from.get("username"))
            .and_then(Value::as_str)
            .map(ToString::to_string),
        text: message
            .get("text")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        sent_unix_ms: message
            .get("date")
            .and_then(Value::as_u64)
            .unwrap_or(0)
            .saturating_mul(1_000),
    })
}

fn split_message_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars = text.chars().collect::<Vec<_>>();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{
        inbound_batch_from_updates, split_message_chunks, telegram_chat_id_value, TelegramChannel,
        TelegramChannelConfig,
    };
    use crate::{ChannelCursor, ChannelError, MessageChannel};

    fn channel_for(server: &MockServer) -> TelegramChannel {
        let mut config = TelegramChannelConfig::new("test-token", "555");
        config.api_base = server.base_url();
        config.retry_max_attempts = 2;
        config.retry_base_delay_ms = 0;
        TelegramChannel::new(config).expect("channel")
    }

    #[test]
    fn unit_new_rejects_missing_token_and_chat() {
        let error = TelegramChannel::new(TelegramChannelConfig::new(" ", "1"))
            .expect_err("missing token");
        assert_eq!(error.code(), "missing_config");
        let error = TelegramChannel::new(TelegramChannelConfig::new("token", ""))
            .expect_err("missing chat");
        assert!(error.to_string().contains("chat id"));
    }

    #[test]
    fn unit_chat_id_value_keeps_numeric_ids_numeric() {
        assert_eq!(telegram_chat_id_value("-100123"), json!(-100123));
        assert_eq!(telegram_chat_id_value("@ops_room"), json!("@ops_room"));
    }

    #[test]
    fn unit_inbound_batch_advances_past_updates_without_messages() {
        let updates = vec![
            json!({
                "update_id": 10,
                "message": {
                    "message_id": 7,
                    "date": 1_700_000_000,
                    "text": "#abc123 yes",
                    "chat": {"id": 555, "type": "private"},
                    "from": {"id": 42, "is_bot": false, "username": "operator"}
                }
            }),
            json!({"update_id": 12, "edited_message": {"message_id": 7}}),
        ];
        let batch = inbound_batch_from_updates(&updates);
        assert_eq!(batch.next_cursor, Some(ChannelCursor(13)));
        assert_eq!(batch.messages.len(), 1);
        let message = &batch.messages[0];
        assert_eq!(message.message_id, "7");
        assert_eq!(message.conversation_id, "555");
        assert_eq!(message.sender_id.as_deref(), Some("42"));
        assert_eq!(message.sender_username.as_deref(), Some("operator"));
        assert_eq!(message.text.as_deref(), Some("#abc123 yes"));
        assert_eq!(message.sent_unix_ms, 1_700_000_000_000);
    }

    #[test]
    fn unit_split_message_chunks_respects_char_boundaries() {
        let chunks = split_message_chunks("ééééé", 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
        assert_eq!(split_message_chunks("", 10), vec![String::new()]);
    }

    #[tokio::test]
    async fn functional_send_text_posts_to_configured_chat() {
        let server = MockServer::start();
        let send = server.mock(|when, then| {
            when.method(POST)
                .path("/bottest-token/sendMessage")
                .json_body_includes(json!({"chat_id": 555, "text": "hello"}).to_string());
            then.status(200)
                .json_body(json!({"ok": true, "result": {"message_id": 99}}));
        });

        let receipt = channel_for(&server)
            .send_text("hello")
            .await
            .expect("send should succeed");
        send.assert();
        assert_eq!(receipt.message_id.as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn functional_fetch_since_passes_offset_and_maps_updates() {
        let server = MockServer::start();
        let updates = server.mock(|when, then| {
            when.method(GET)
                .path("/bottest-token/getUpdates")
                .query_param("offset", "41")
                .query_param("timeout", "0");
            then.status(200).json_body(json!({
                "ok": true,
                "result": [{
                    "update_id": 41,
                    "message": {
                        "message_id": 3,
                        "date": 1,
                        "text": "#id1 ok",
                        "chat": {"id": 555},
                        "from": {"id": 42}
                    }
                }]
            }));
        });

        let batch = channel_for(&server)
            .fetch_since(Some(ChannelCursor(41)))
            .await
            .expect("fetch should succeed");
        updates.assert();
        assert_eq!(batch.next_cursor, Some(ChannelCursor(42)));
        assert_eq!(batch.messages[0].text.as_deref(), Some("#id1 ok"));
    }

    #[tokio::test]
    async fn functional_retryable_status_is_retried_until_budget_is_spent() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(GET).path("/bottest-token/getUpdates");
            then.status(503)
                .json_body(json!({"ok": false, "description": "Service Unavailable"}));
        });

        let error = channel_for(&server)
            .fetch_since(None)
            .await
            .expect_err("fetch should fail");
        failing.assert_calls(2);
        assert_eq!(
            error,
            ChannelError::HttpStatus {
                status: 503,
                body: "Service Unavailable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn functional_auth_failure_is_not_retried_and_hides_token() {
        let server = MockServer::start();
        let unauthorized = server.mock(|when, then| {
            when.method(POST).path("/bottest-token/sendMessage");
            then.status(401)
                .json_body(json!({"ok": false, "error_code": 401, "description": "Unauthorized"}));
        });

        let error = channel_for(&server)
            .send_text("hello")
            .await
            .expect_err("send should fail");
        unauthorized.assert_calls(1);
        assert!(!error.to_string().contains("test-token"));
    }

    #[tokio::test]
    async fn functional_ok_false_payload_is_reported_as_api_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bottest-token/getUpdates");
            then.status(200)
                .json_body(json!({"ok": false, "description": "Conflict: webhook is active"}));
        });

        let error = channel_for(&server)
            .fetch_since(None)
            .await
            .expect_err("fetch should fail");
        assert_eq!(error.code(), "api_error");
        assert!(error.to_string().contains("webhook"));
    }

    #[tokio::test]
    async fn functional_resume_cursor_requests_latest_update_only() {
        let server = MockServer::start();
        let latest = server.mock(|when, then| {
            when.method(GET)
                .path("/bottest-token/getUpdates")
                .query_param("offset", "-1");
            then.status(200)
                .json_body(json!({"ok": true, "result": [{"update_id": 900}]}));
        });

        let cursor = channel_for(&server)
            .resume_cursor()
            .await
            .expect("resume should succeed");
        latest.assert();
        assert_eq!(cursor, Some(ChannelCursor(901)));
    }
}
