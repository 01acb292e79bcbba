use std::path::{Path, PathBuf};

use parley_channel::InboundMessage;
use parley_core::{append_line_with_rotation, current_unix_timestamp_ms, LogRotationPolicy};
use serde_json::{json, Value};

use crate::escalation_registry::{EscalationRequest, ReplyMatch};

pub const ESCALATION_AUDIT_FILE_NAME: &str = "escalation-events.jsonl";

#[derive(Debug, Clone)]
/// Append-only NDJSON trail of escalation lifecycle events.
///
/// Write failures are logged and swallowed; auditing never changes the
/// outcome of a raise, poll, or reply.
pub struct EscalationAuditLog {
    path: PathBuf,
    rotation: LogRotationPolicy,
}

impl EscalationAuditLog {
    pub fn new(path: PathBuf, rotation: LogRotationPolicy) -> Self {
        Self { path, rotation }
    }

    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(
            state_dir.join(ESCALATION_AUDIT_FILE_NAME),
            LogRotationPolicy::from_env(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_raised(&self, request: &EscalationRequest) {
        self.append(json!({
            "event": "escalation_raised",
            "id": request.id,
            "question": request.question,
            "context": request.context,
            "expires_unix_ms": request.expires_unix_ms,
        }));
    }

    pub fn record_delivery_failed(&self, id: &str, reason: &str) {
        self.append(json!({
            "event": "escalation_delivery_failed",
            "id": id,
            "reason": reason,
        }));
    }

    pub fn record_answered(&self, id: &str, reply: &InboundMessage) {
        self.append(json!({
            "event": "escalation_answered",
            "id": id,
            "answered_by": reply.sender_id,
            "answered_by_username": reply.sender_username,
            "message_id": reply.message_id,
            "message_sent_unix_ms": reply.sent_unix_ms,
        }));
    }

    pub fn record_expired(&self, id: &str) {
        self.append(json!({
            "event": "escalation_expired",
            "id": id,
        }));
    }

    pub fn record_reply_rejected(&self, id: &str, outcome: ReplyMatch, message_id: &str) {
        self.append(json!({
            "event": "reply_rejected",
            "id": id,
            "outcome": outcome.as_str(),
            "message_id": message_id,
        }));
    }

    /// Unauthorized replies are recorded without the referenced escalation id.
    pub fn record_reply_unauthorized(&self, sender_id: Option<&str>, reason_code: &str) {
        self.append(json!({
            "event": "reply_unauthorized",
            "sender_id": sender_id,
            "reason_code": reason_code,
        }));
    }

    fn append(&self, mut record: Value) {
        if let Value::Object(fields) = &mut record {
            fields.insert(
                "timestamp_unix_ms".to_string(),
                Value::from(current_unix_timestamp_ms()),
            );
        }
        let line = record.to_string();
        if let Err(error) = append_line_with_rotation(&self.path, &line, self.rotation) {
            tracing::warn!(
                path = %self.path.display(),
                error = %error,
                "failed to append escalation audit record"
            );
        }
    }
}
