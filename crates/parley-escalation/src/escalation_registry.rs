//! In-memory escalation registry.
//!
//! The registry owns every [`EscalationRequest`] for its whole life. Requests
//! only move `pending -> answered` (via [`EscalationRegistry::match_reply_at`])
//! or `pending -> expired` (via a read, a sweep, or a late reply). All
//! operations take one registry-wide lock and never hold it across an await.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use parley_core::{current_unix_timestamp_ms, duration_to_ms, is_past_deadline_ms};
use serde::Serialize;

const RANDOM_ID_PREFIX_CHARS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Answered,
    Expired,
}

impl EscalationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Snapshot of one escalation.
pub struct EscalationRequest {
    pub id: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub created_unix_ms: u64,
    pub expires_unix_ms: u64,
    pub status: EscalationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_unix_ms: Option<u64>,
}

impl EscalationRequest {
    fn expire(&mut self, now_unix_ms: u64) {
        self.status = EscalationStatus::Expired;
        self.resolved_unix_ms = Some(now_unix_ms);
    }

    fn expire_if_due(&mut self, now_unix_ms: u64) -> bool {
        if self.status == EscalationStatus::Pending
            && is_past_deadline_ms(self.expires_unix_ms, now_unix_ms)
        {
            self.expire(now_unix_ms);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
/// Outcome of feeding one parsed reply into the registry.
pub enum ReplyMatch {
    Answered,
    Unknown,
    AlreadyAnswered,
    Expired,
}

impl ReplyMatch {
    pub fn is_answered(self) -> bool {
        matches!(self, Self::Answered)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answered => "answered",
            Self::Unknown => "unknown",
            Self::AlreadyAnswered => "already_answered",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub retention: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(1_800),
            max_timeout: Duration::from_secs(86_400),
            retention: Duration::from_secs(3_600),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryCounts {
    pub pending: usize,
    pub answered: usize,
    pub expired: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, EscalationRequest>,
    sequence: u64,
}

#[derive(Debug, Default)]
/// Process-local store of escalation requests, shared between the service and
/// the poller through an `Arc`.
pub struct EscalationRegistry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

impl EscalationRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves the effective timeout: the default when unset, clamped to the
    /// configured maximum.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.config.default_timeout)
            .min(self.config.max_timeout)
    }

    pub fn create(
        &self,
        question: &str,
        context: Option<&str>,
        timeout: Option<Duration>,
    ) -> String {
        self.create_at(question, context, timeout, current_unix_timestamp_ms())
            .id
    }

    /// Records a new pending request and returns its snapshot.
    pub fn create_at(
        &self,
        question: &str,
        context: Option<&str>,
        timeout: Option<Duration>,
        now_unix_ms: u64,
    ) -> EscalationRequest {
        let timeout_ms = duration_to_ms(self.effective_timeout(timeout));
        let context = context
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        let mut state = self.lock();
        state.sequence = state.sequence.saturating_add(1);
        let id = next_escalation_id(state.sequence);
        let request = EscalationRequest {
            id: id.clone(),
            question: question.trim().to_string(),
            context,
            created_unix_ms: now_unix_ms,
            expires_unix_ms: now_unix_ms.saturating_add(timeout_ms),
            status: EscalationStatus::Pending,
            answer: None,
            answered_by: None,
            resolved_unix_ms: None,
        };
        state.entries.insert(id, request.clone());
        request
    }

    pub fn match_reply(&self, id: &str, answer: &str, answered_by: &str) -> ReplyMatch {
        self.match_reply_at(id, answer, answered_by, current_unix_timestamp_ms())
    }

    /// Applies a reply to `id`. Only the first reply to a live pending request
    /// is accepted; anything else leaves the registry unchanged apart from a
    /// due expiry transition.
    pub fn match_reply_at(
        &self,
        id: &str,
        answer: &str,
        answered_by: &str,
        now_unix_ms: u64,
    ) -> ReplyMatch {
        let answer = answer.trim();
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(id) else {
            return ReplyMatch::Unknown;
        };
        if entry.expire_if_due(now_unix_ms) {
            return ReplyMatch::Expired;
        }
        match entry.status {
            EscalationStatus::Answered => ReplyMatch::AlreadyAnswered,
            EscalationStatus::Expired => ReplyMatch::Expired,
            EscalationStatus::Pending if answer.is_empty() => ReplyMatch::Unknown,
            EscalationStatus::Pending => {
                entry.status = EscalationStatus::Answered;
                entry.answer = Some(answer.to_string());
                entry.answered_by = Some(answered_by.to_string());
                entry.resolved_unix_ms = Some(now_unix_ms);
                ReplyMatch::Answered
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<EscalationRequest> {
        self.get_at(id, current_unix_timestamp_ms())
    }

    /// Returns the current snapshot, expiring a pending request whose deadline
    /// has passed first.
    pub fn get_at(&self, id: &str, now_unix_ms: u64) -> Option<EscalationRequest> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(id)?;
        entry.expire_if_due(now_unix_ms);
        Some(entry.clone())
    }

    pub fn sweep_expired(&self) -> Vec<String> {
        self.sweep_expired_at(current_unix_timestamp_ms())
    }

    /// Expires every pending request past its deadline and returns their ids.
    pub fn sweep_expired_at(&self, now_unix_ms: u64) -> Vec<String> {
        let mut state = self.lock();
        let mut expired = state
            .entries
            .values_mut()
            .filter_map(|entry| {
                entry
                    .expire_if_due(now_unix_ms)
                    .then(|| entry.id.clone())
            })
            .collect::<Vec<_>>();
        expired.sort();
        expired
    }

    /// Drops terminal requests resolved longer than the retention window ago.
    pub fn evict_terminal_at(&self, now_unix_ms: u64) -> usize {
        let retention_ms = duration_to_ms(self.config.retention);
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| {
            if !entry.status.is_terminal() {
                return true;
            }
            let resolved = entry.resolved_unix_ms.unwrap_or(entry.expires_unix_ms);
            resolved.saturating_add(retention_ms) >= now_unix_ms
        });
        before - state.entries.len()
    }

    pub fn counts(&self) -> RegistryCounts {
        let state = self.lock();
        let mut counts = RegistryCounts::default();
        for entry in state.entries.values() {
            match entry.status {
                EscalationStatus::Pending => counts.pending += 1,
                EscalationStatus::Answered => counts.answered += 1,
                EscalationStatus::Expired => counts.expired += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn next_escalation_id(sequence: u64) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{sequence:x}", &random[..RANDOM_ID_PREFIX_CHARS])
}
