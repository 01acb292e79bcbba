use std::path::Path;

use anyhow::{bail, Context, Result};
use parley_channel::ChannelCursor;
use parley_core::write_text_atomic;
use serde::{Deserialize, Serialize};

pub const POLLER_STATE_SCHEMA_VERSION: u32 = 1;
pub const POLLER_STATE_FILE_NAME: &str = "poller-state.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Rolling health counters for the reply poller.
pub struct PollerHealth {
    pub updated_unix_ms: u64,
    pub cycle_count: u64,
    pub failure_streak: usize,
    pub last_cycle_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub pending: usize,
    pub answered: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerStateFile {
    pub schema_version: u32,
    #[serde(default)]
    pub cursor: Option<ChannelCursor>,
    #[serde(default)]
    pub health: PollerHealth,
}

impl Default for PollerStateFile {
    fn default() -> Self {
        Self {
            schema_version: POLLER_STATE_SCHEMA_VERSION,
            cursor: None,
            health: PollerHealth::default(),
        }
    }
}

/// Loads the state file, returning defaults when it does not exist yet.
pub fn load_poller_state(path: &Path) -> Result<PollerStateFile> {
    if !path.exists() {
        return Ok(PollerStateFile::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read poller state file {}", path.display()))?;
    let state = serde_json::from_str::<PollerStateFile>(&raw)
        .with_context(|| format!("failed to parse poller state file {}", path.display()))?;
    if state.schema_version != POLLER_STATE_SCHEMA_VERSION {
        bail!(
            "unsupported poller state schema: expected {}, found {}",
            POLLER_STATE_SCHEMA_VERSION,
            state.schema_version
        );
    }
    Ok(state)
}

pub fn save_poller_state(path: &Path, state: &PollerStateFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut payload =
        serde_json::to_string_pretty(state).context("failed to serialize poller state")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
        .with_context(|| format!("failed to write poller state file {}", path.display()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Operator-facing view of the poller state file.
pub struct PollerStateReport {
    pub state_path: String,
    pub state_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<ChannelCursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<PollerHealth>,
    pub diagnostics: Vec<String>,
}

pub fn inspect_poller_state(path: &Path) -> PollerStateReport {
    let mut report = PollerStateReport {
        state_path: path.display().to_string(),
        ..PollerStateReport::default()
    };
    if !path.exists() {
        report
            .diagnostics
            .push(format!("state_missing: path={}", path.display()));
        return report;
    }
    report.state_present = true;
    match load_poller_state(path) {
        Ok(state) => {
            report.schema_version = Some(state.schema_version);
            report.cursor = state.cursor;
            report.health = Some(state.health);
        }
        Err(error) => report
            .diagnostics
            .push(format!("state_load_failed: {error:#}")),
    }
    report
}
