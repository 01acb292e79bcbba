use std::{sync::Arc, time::Duration};

use parley_channel::MessageChannel;
use parley_core::current_unix_timestamp_ms;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    escalation_audit::EscalationAuditLog,
    escalation_message::render_escalation_message,
    escalation_registry::{EscalationRegistry, EscalationStatus},
    reply_parser::DEFAULT_REPLY_MARKER,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RaiseRequest {
    pub question: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default, alias = "timeoutSeconds")]
    pub timeout_seconds: Option<u64>,
}

impl RaiseRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaiseReceipt {
    pub id: String,
    pub expires_unix_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscalationError {
    #[error("invalid escalation request: {0}")]
    InvalidRequest(String),
    /// The question was recorded but delivery was not confirmed. The request
    /// stays pending and may still be answered.
    #[error("escalation {id} was recorded but delivery was not confirmed: {reason}")]
    DeliveryFailure { id: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Pending,
    Answered,
    Expired,
    Unknown,
}

impl From<EscalationStatus> for PollStatus {
    fn from(status: EscalationStatus) -> Self {
        match status {
            EscalationStatus::Pending => Self::Pending,
            EscalationStatus::Answered => Self::Answered,
            EscalationStatus::Expired => Self::Expired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollResponse {
    pub id: String,
    pub status: PollStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_unix_ms: Option<u64>,
}

impl PollResponse {
    fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: PollStatus::Unknown,
            answer: None,
            answered_by: None,
            expires_unix_ms: None,
        }
    }
}

/// Raise/poll entry point used by the agent-facing surfaces.
pub struct EscalationService {
    registry: Arc<EscalationRegistry>,
    channel: Arc<dyn MessageChannel>,
    marker: char,
    audit: Option<EscalationAuditLog>,
}

impl EscalationService {
    pub fn new(registry: Arc<EscalationRegistry>, channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            registry,
            channel,
            marker: DEFAULT_REPLY_MARKER,
            audit: None,
        }
    }

    pub fn with_reply_marker(mut self, marker: char) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_audit_log(mut self, audit: EscalationAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &Arc<EscalationRegistry> {
        &self.registry
    }

    pub async fn raise(&self, request: RaiseRequest) -> Result<RaiseReceipt, EscalationError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(EscalationError::InvalidRequest(
                "question cannot be empty".to_string(),
            ));
        }
        if request.timeout_seconds == Some(0) {
            return Err(EscalationError::InvalidRequest(
                "timeout_seconds must be greater than zero".to_string(),
            ));
        }

        let created = self.registry.create_at(
            question,
            request.context.as_deref(),
            request.timeout_seconds.map(Duration::from_secs),
            current_unix_timestamp_ms(),
        );
        if let Some(audit) = &self.audit {
            audit.record_raised(&created);
        }
        tracing::info!(
            escalation_id = %created.id,
            expires_unix_ms = created.expires_unix_ms,
            channel = self.channel.name(),
            "escalation raised"
        );

        let message = render_escalation_message(&created, self.marker);
        match self.channel.send_text(&message).await {
            Ok(receipt) => Ok(RaiseReceipt {
                id: created.id,
                expires_unix_ms: created.expires_unix_ms,
                delivery_message_id: receipt.message_id,
            }),
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!(
                    escalation_id = %created.id,
                    error_code = error.code(),
                    error = %reason,
                    "escalation delivery was not confirmed; request stays pending"
                );
                if let Some(audit) = &self.audit {
                    audit.record_delivery_failed(&created.id, &reason);
                }
                Err(EscalationError::DeliveryFailure {
                    id: created.id,
                    reason,
                })
            }
        }
    }

    pub fn poll(&self, id: &str) -> PollResponse {
        self.poll_at(id, current_unix_timestamp_ms())
    }

    /// Unknown or evicted ids come back as [`PollStatus::Unknown`].
    pub fn poll_at(&self, id: &str, now_unix_ms: u64) -> PollResponse {
        let normalized = id.trim().to_ascii_lowercase();
        let Some(request) = self.registry.get_at(&normalized, now_unix_ms) else {
            return PollResponse::unknown(id.trim());
        };
        PollResponse {
            id: request.id,
            status: request.status.into(),
            answer: request.answer,
            answered_by: request.answered_by,
            expires_unix_ms: Some(request.expires_unix_ms),
        }
    }

    /// Polls until `id` leaves the pending state or `timeout` elapses, then
    /// returns the latest snapshot.
    pub async fn wait_for_answer(
        &self,
        id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> PollResponse {
        let deadline = tokio::time::Instant::now() + timeout;
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        loop {
            let response = self.poll(id);
            if response.status != PollStatus::Pending {
                return response;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return response;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }
}
