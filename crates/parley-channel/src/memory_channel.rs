use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::channel_contract::{
    ChannelCursor, ChannelError, DeliveryReceipt, InboundBatch, InboundMessage, MessageChannel,
};

#[derive(Debug, Default)]
struct MemoryChannelState {
    sent: Vec<String>,
    inbound: Vec<InboundMessage>,
    fail_sends: bool,
    pending_fetch_failures: usize,
    lose_cursor_once: bool,
    fetch_calls: usize,
}

/// In-process channel: sent messages are recorded, inbound messages are
/// queued by the caller, and cursors are indexes into the inbound log.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    state: Mutex<MemoryChannelState>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryChannelState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues an inbound text message and returns its message id.
    pub fn push_inbound(
        &self,
        sender_id: Option<&str>,
        conversation_id: &str,
        text: &str,
    ) -> String {
        let mut state = self.lock();
        let message_id = (state.inbound.len() + 1).to_string();
        state.inbound.push(InboundMessage {
            message_id: message_id.clone(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.map(ToString::to_string),
            sender_username: None,
            text: Some(text.to_string()),
            sent_unix_ms: 0,
        });
        message_id
    }

    /// Queues an inbound message exactly as given.
    pub fn push_raw_inbound(&self, message: InboundMessage) {
        self.lock().inbound.push(message);
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.lock().fetch_calls
    }

    /// Makes every following send fail (message is still recorded, mimicking
    /// a lost acknowledgement) until reset.
    pub fn set_send_failure(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn fail_next_fetches(&self, count: usize) {
        self.lock().pending_fetch_failures = count;
    }

    pub fn lose_cursor_once(&self) {
        self.lock().lose_cursor_once = true;
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send_text(&self, text: &str) -> Result<DeliveryReceipt, ChannelError> {
        let mut state = self.lock();
        state.sent.push(text.to_string());
        if state.fail_sends {
            return Err(ChannelError::Transport(
                "acknowledgement lost".to_string(),
            ));
        }
        Ok(DeliveryReceipt {
            message_id: Some(format!("out-{}", state.sent.len())),
        })
    }

    async fn fetch_since(
        &self,
        cursor: Option<ChannelCursor>,
    ) -> Result<InboundBatch, ChannelError> {
        let mut state = self.lock();
        state.fetch_calls = state.fetch_calls.saturating_add(1);
        if state.pending_fetch_failures > 0 {
            state.pending_fetch_failures -= 1;
            return Err(ChannelError::Transport("channel unreachable".to_string()));
        }
        if state.lose_cursor_once {
            state.lose_cursor_once = false;
            return Err(ChannelError::CursorLost);
        }

        let start = cursor
            .map(|cursor| usize::try_from(cursor.value()).unwrap_or(usize::MAX))
            .unwrap_or(0)
            .min(state.inbound.len());
        let messages = state.inbound[start..].to_vec();
        let next_cursor = if messages.is_empty() {
            None
        } else {
            Some(ChannelCursor(state.inbound.len() as u64))
        };
        Ok(InboundBatch {
            messages,
            next_cursor,
        })
    }

    async fn resume_cursor(&self) -> Result<Option<ChannelCursor>, ChannelError> {
        Ok(Some(ChannelCursor(self.lock().inbound.len() as u64)))
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryChannel;
    use crate::{ChannelCursor, ChannelError, MessageChannel};

    #[tokio::test]
    async fn unit_memory_channel_fetch_respects_cursor() {
        let channel = MemoryChannel::new();
        channel.push_inbound(Some("1"), "1", "first");
        channel.push_inbound(Some("1"), "1", "second");

        let batch = channel.fetch_since(None).await.expect("fetch");
        assert_eq!(batch.messages.len(), 2);
        assert_eq!(batch.next_cursor, Some(ChannelCursor(2)));

        let empty = channel
            .fetch_since(batch.next_cursor)
            .await
            .expect("fetch again");
        assert!(empty.messages.is_empty());
        assert_eq!(empty.next_cursor, None);
    }

    #[tokio::test]
    async fn unit_memory_channel_injected_failures_are_consumed() {
        let channel = MemoryChannel::new();
        channel.fail_next_fetches(1);
        channel.lose_cursor_once();
        assert!(matches!(
            channel.fetch_since(None).await,
            Err(ChannelError::Transport(_))
        ));
        assert_eq!(
            channel.fetch_since(None).await,
            Err(ChannelError::CursorLost)
        );
        assert!(channel.fetch_since(None).await.is_ok());
        assert_eq!(channel.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn unit_memory_channel_records_sends_even_when_failing() {
        let channel = MemoryChannel::new();
        channel.set_send_failure(true);
        assert!(channel.send_text("hello").await.is_err());
        assert_eq!(channel.sent_messages(), vec!["hello".to_string()]);
    }
}
