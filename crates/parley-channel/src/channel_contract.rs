use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Position in a channel's inbound history. Only ever moves forward.
pub struct ChannelCursor(pub u64);

impl ChannelCursor {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One inbound message as seen by the escalation subsystem.
pub struct InboundMessage {
    pub message_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sent_unix_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Messages fetched in one call plus the cursor to resume from.
///
/// `next_cursor` is `None` when nothing new was observed; callers keep their
/// current cursor in that case.
pub struct InboundBatch {
    pub messages: Vec<InboundMessage>,
    pub next_cursor: Option<ChannelCursor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Acknowledgement returned by a successful send.
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Failures surfaced by channel adapters.
pub enum ChannelError {
    #[error("channel configuration is incomplete: {0}")]
    MissingConfig(String),
    #[error("channel transport error: {0}")]
    Transport(String),
    #[error("channel request failed with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("channel api rejected the request: {description}")]
    Api { description: String },
    #[error("failed to parse channel response: {0}")]
    Parse(String),
    #[error("channel cursor is no longer valid")]
    CursorLost,
}

impl ChannelError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingConfig(_) => "missing_config",
            Self::Transport(_) => "transport_error",
            Self::HttpStatus { .. } => "http_status",
            Self::Api { .. } => "api_error",
            Self::Parse(_) => "parse_failed",
            Self::CursorLost => "cursor_lost",
        }
    }

    /// True for failures worth retrying inside the same call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
/// Transport used to deliver questions and receive replies.
pub trait MessageChannel: Send + Sync {
    /// Short label used in logs, e.g. `telegram`.
    fn name(&self) -> &str;

    /// Sends `text` to the configured destination.
    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt, ChannelError>;

    /// Returns messages strictly after `cursor` (or everything the channel
    /// still retains when `cursor` is `None`).
    async fn fetch_since(&self, cursor: Option<ChannelCursor>)
        -> Result<InboundBatch, ChannelError>;

    /// Returns the cursor that corresponds to "now", skipping any backlog.
    async fn resume_cursor(&self) -> Result<Option<ChannelCursor>, ChannelError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelCursor, ChannelError};

    #[test]
    fn unit_channel_error_retryability_follows_status_class() {
        assert!(ChannelError::Transport("reset".to_string()).is_retryable());
        assert!(ChannelError::HttpStatus {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(ChannelError::HttpStatus {
            status: 502,
            body: String::new()
        }
        .is_retryable());
        assert!(!ChannelError::HttpStatus {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!ChannelError::CursorLost.is_retryable());
        assert_eq!(ChannelError::CursorLost.code(), "cursor_lost");
    }

    #[test]
    fn unit_cursor_orders_by_position() {
        assert!(ChannelCursor(3) < ChannelCursor(10));
        assert_eq!(ChannelCursor(7).value(), 7);
    }
}
