use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_FILES: usize = 5;
const MAX_BYTES_ENV: &str = "PARLEY_LOG_ROTATION_MAX_BYTES";
const MAX_FILES_ENV: &str = "PARLEY_LOG_ROTATION_MAX_FILES";

/// Size-based rotation settings for append-only NDJSON logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl LogRotationPolicy {
    /// Reads overrides from the environment; unset, unparsable, or zero values
    /// keep the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_bytes: positive_env_value(MAX_BYTES_ENV).unwrap_or(defaults.max_bytes),
            max_files: positive_env_value(MAX_FILES_ENV).unwrap_or(defaults.max_files),
        }
    }

    pub fn is_enabled(self) -> bool {
        self.max_bytes > 0 && self.max_files > 0
    }
}

fn positive_env_value<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

/// Appends `line` plus a newline to `path`, rotating first when the write would
/// push the active file past `policy.max_bytes`.
pub fn append_line_with_rotation(path: &Path, line: &str, policy: LogRotationPolicy) -> Result<()> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if policy.is_enabled() {
        if let Ok(metadata) = std::fs::metadata(path) {
            let incoming = u64::try_from(line.len().saturating_add(1)).unwrap_or(u64::MAX);
            if metadata.len().saturating_add(incoming) > policy.max_bytes {
                rotate(path, policy)?;
            }
        }
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{line}").with_context(|| format!("failed to append {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{index}", path.display()))
}

// Shifts path -> path.1 -> path.2 ..., dropping whatever falls past max_files - 1.
fn rotate(path: &Path, policy: LogRotationPolicy) -> Result<()> {
    if policy.max_files <= 1 {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to truncate {}", path.display()))?;
        return Ok(());
    }

    let oldest = policy.max_files - 1;
    for index in (1..=oldest).rev() {
        let source = if index == 1 {
            path.to_path_buf()
        } else {
            backup_path(path, index - 1)
        };
        if !source.exists() {
            continue;
        }
        let destination = backup_path(path, index);
        if destination.exists() {
            std::fs::remove_file(&destination)
                .with_context(|| format!("failed to drop backup {}", destination.display()))?;
        }
        std::fs::rename(&source, &destination).with_context(|| {
            format!(
                "failed to rotate {} to {}",
                source.display(),
                destination.display()
            )
        })?;
    }
    Ok(())
}
