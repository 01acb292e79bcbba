//! Low-level helpers shared by the parley crates.
//!
//! Wall-clock helpers used for escalation deadlines, atomic state-file writes,
//! and size-rotated NDJSON logs.

pub mod atomic_io;
pub mod log_rotation;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use log_rotation::{append_line_with_rotation, LogRotationPolicy};
pub use time_utils::{
    current_unix_timestamp_ms, duration_to_ms, format_unix_ms_rfc3339, is_past_deadline_ms,
};
