//! Background reply poller.
//!
//! Each cycle fetches inbound messages after the stored cursor, turns replies
//! into registry matches, then advances the cursor past everything fetched.
//! Per-message problems never fail a cycle; channel failures leave the cursor
//! where it was so the next cycle retries the same window.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use parley_access::{evaluate_sender_access, SenderAuthorizationConfig};
use parley_channel::{ChannelCursor, ChannelError, InboundMessage, MessageChannel};
use parley_core::{current_unix_timestamp_ms, duration_to_ms};
use serde::Serialize;
use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    escalation_audit::EscalationAuditLog,
    escalation_registry::{EscalationRegistry, ReplyMatch},
    poller_state::{load_poller_state, save_poller_state, PollerHealth, PollerStateFile},
    reply_parser::ReplyParser,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Tallies for one poll cycle.
pub struct PollCycleReport {
    pub fetched: usize,
    pub answered: usize,
    pub ignored_no_text: usize,
    pub ignored_unparsed: usize,
    pub unauthorized: usize,
    pub rejected_unknown: usize,
    pub rejected_terminal: usize,
    pub expired: usize,
    pub evicted: usize,
    pub fetch_failed: bool,
    pub cursor_reset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MessageOutcome {
    NoText,
    Unparsed,
    Unauthorized,
    Matched(ReplyMatch),
}

pub struct EscalationPoller {
    registry: Arc<EscalationRegistry>,
    channel: Arc<dyn MessageChannel>,
    parser: ReplyParser,
    authorization: SenderAuthorizationConfig,
    audit: Option<EscalationAuditLog>,
    state_path: Option<PathBuf>,
    cursor: Option<ChannelCursor>,
    health: PollerHealth,
}

impl std::fmt::Debug for EscalationPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationPoller")
            .field("channel", &self.channel.name())
            .field("cursor", &self.cursor)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl EscalationPoller {
    pub fn new(
        registry: Arc<EscalationRegistry>,
        channel: Arc<dyn MessageChannel>,
        parser: ReplyParser,
        authorization: SenderAuthorizationConfig,
    ) -> Self {
        Self {
            registry,
            channel,
            parser,
            authorization,
            audit: None,
            state_path: None,
            cursor: None,
            health: PollerHealth::default(),
        }
    }

    pub fn with_audit_log(mut self, audit: EscalationAuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Persists the cursor and health to `path` after every cycle, resuming
    /// from the cursor already stored there.
    pub fn with_state_file(mut self, path: PathBuf) -> Result<Self> {
        let state = load_poller_state(&path)?;
        self.cursor = state.cursor;
        self.health = state.health;
        self.state_path = Some(path);
        Ok(self)
    }

    pub fn cursor(&self) -> Option<ChannelCursor> {
        self.cursor
    }

    pub fn health(&self) -> &PollerHealth {
        &self.health
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    /// Runs one fetch/match/sweep cycle with `now_unix_ms` as the clock.
    pub async fn run_cycle(&mut self, now_unix_ms: u64) -> PollCycleReport {
        let started = Instant::now();
        let mut report = PollCycleReport::default();
        let mut cycle_error: Option<String> = None;

        match self.channel.fetch_since(self.cursor).await {
            Ok(batch) => {
                report.fetched = batch.messages.len();
                for message in &batch.messages {
                    let outcome = self.process_message(message, now_unix_ms);
                    tally_outcome(&mut report, &outcome);
                }
                if let Some(next_cursor) = batch.next_cursor {
                    self.cursor = Some(
                        self.cursor
                            .map_or(next_cursor, |current| current.max(next_cursor)),
                    );
                }
            }
            Err(ChannelError::CursorLost) => {
                report.fetch_failed = true;
                cycle_error = Some(ChannelError::CursorLost.code().to_string());
                match self.channel.resume_cursor().await {
                    Ok(cursor) => {
                        tracing::warn!(
                            channel = self.channel.name(),
                            previous = ?self.cursor,
                            resumed = ?cursor,
                            "channel cursor lost; resuming from the latest position"
                        );
                        self.cursor = cursor;
                        report.cursor_reset = true;
                    }
                    Err(error) => {
                        tracing::warn!(
                            channel = self.channel.name(),
                            error = %error,
                            "failed to resume lost channel cursor"
                        );
                    }
                }
            }
            Err(error) => {
                report.fetch_failed = true;
                cycle_error = Some(error.code().to_string());
                tracing::warn!(
                    channel = self.channel.name(),
                    error = %error,
                    failure_streak = self.health.failure_streak.saturating_add(1),
                    "reply fetch failed; retrying next cycle"
                );
            }
        }

        for id in self.registry.sweep_expired_at(now_unix_ms) {
            tracing::info!(escalation_id = %id, "escalation expired without an answer");
            if let Some(audit) = &self.audit {
                audit.record_expired(&id);
            }
            report.expired += 1;
        }
        report.evicted = self.registry.evict_terminal_at(now_unix_ms);

        self.update_health(&report, cycle_error, now_unix_ms, started.elapsed());
        self.persist_state();
        report
    }

    fn process_message(&self, message: &InboundMessage, now_unix_ms: u64) -> MessageOutcome {
        let Some(text) = message.text.as_deref() else {
            return MessageOutcome::NoText;
        };
        let Some(reply) = self.parser.parse(text) else {
            tracing::trace!(message_id = %message.message_id, "ignoring non-reply message");
            return MessageOutcome::Unparsed;
        };

        let decision = evaluate_sender_access(
            &self.authorization,
            message.sender_id.as_deref(),
            &message.conversation_id,
        );
        if !decision.is_allowed() {
            tracing::debug!(
                sender_id = message.sender_id.as_deref().unwrap_or("none"),
                reason_code = decision.reason_code(),
                "dropping reply from unauthorized sender"
            );
            if let Some(audit) = &self.audit {
                audit.record_reply_unauthorized(
                    message.sender_id.as_deref(),
                    decision.reason_code(),
                );
            }
            return MessageOutcome::Unauthorized;
        }

        let answered_by = message.sender_id.as_deref().unwrap_or_default();
        let outcome = self.registry.match_reply_at(
            &reply.correlation_id,
            &reply.answer,
            answered_by,
            now_unix_ms,
        );
        match outcome {
            ReplyMatch::Answered => {
                tracing::info!(
                    escalation_id = %reply.correlation_id,
                    answered_by,
                    "escalation answered"
                );
                if let Some(audit) = &self.audit {
                    audit.record_answered(&reply.correlation_id, message);
                }
            }
            rejected => {
                tracing::debug!(
                    escalation_id = %reply.correlation_id,
                    outcome = rejected.as_str(),
                    "reply did not match a pending escalation"
                );
                if let Some(audit) = &self.audit {
                    audit.record_reply_rejected(
                        &reply.correlation_id,
                        rejected,
                        &message.message_id,
                    );
                }
            }
        }
        MessageOutcome::Matched(outcome)
    }

    fn update_health(
        &mut self,
        report: &PollCycleReport,
        cycle_error: Option<String>,
        now_unix_ms: u64,
        elapsed: Duration,
    ) {
        let counts = self.registry.counts();
        self.health.updated_unix_ms = now_unix_ms;
        self.health.cycle_count = self.health.cycle_count.saturating_add(1);
        self.health.last_cycle_duration_ms = duration_to_ms(elapsed);
        self.health.failure_streak = if report.fetch_failed {
            self.health.failure_streak.saturating_add(1)
        } else {
            0
        };
        self.health.last_error = cycle_error;
        self.health.pending = counts.pending;
        self.health.answered = counts.answered;
        self.health.expired = counts.expired;
    }

    fn persist_state(&self) {
        let Some(path) = self.state_path.as_deref() else {
            return;
        };
        let state = PollerStateFile {
            cursor: self.cursor,
            health: self.health.clone(),
            ..PollerStateFile::default()
        };
        if let Err(error) = save_poller_state(path, &state) {
            let error = format!("{error:#}");
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "failed to persist poller state"
            );
        }
    }
}

fn tally_outcome(report: &mut PollCycleReport, outcome: &MessageOutcome) {
    match outcome {
        MessageOutcome::NoText => report.ignored_no_text += 1,
        MessageOutcome::Unparsed => report.ignored_unparsed += 1,
        MessageOutcome::Unauthorized => report.unauthorized += 1,
        MessageOutcome::Matched(ReplyMatch::Answered) => report.answered += 1,
        MessageOutcome::Matched(ReplyMatch::Unknown) => report.rejected_unknown += 1,
        MessageOutcome::Matched(ReplyMatch::AlreadyAnswered | ReplyMatch::Expired) => {
            report.rejected_terminal += 1
        }
    }
}

/// Handle to a poller running on the tokio runtime.
pub struct EscalationPollerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EscalationPollerHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the loop after any in-flight cycle and waits for it to exit.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub fn start_escalation_poller(
    poller: EscalationPoller,
    interval: Duration,
) -> Result<EscalationPollerHandle> {
    if interval.is_zero() {
        anyhow::bail!("escalation poll interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("escalation poller requires an active Tokio runtime")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = handle.spawn(run_escalation_poller_loop(poller, interval, shutdown_rx));
    Ok(EscalationPollerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_escalation_poller_loop(
    mut poller: EscalationPoller,
    interval: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    tracing::info!(
        channel = poller.channel.name(),
        interval_ms = duration_to_ms(interval),
        cursor = ?poller.cursor,
        "escalation poller started"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = poller.run_cycle(current_unix_timestamp_ms()).await;
                if report.answered > 0 || report.expired > 0 {
                    tracing::debug!(?report, "escalation poll cycle completed");
                }
            }
            _ = &mut shutdown_rx => break,
        }
    }

    tracing::info!(
        cycles = poller.health.cycle_count,
        cursor = ?poller.cursor,
        "escalation poller stopped"
    );
}
