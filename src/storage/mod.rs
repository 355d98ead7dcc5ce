//! Durable storage for event logs.
//!
//! One trace file per agent run:
//! - Length-prefixed, versioned, CRC32-checked record frames
//! - A span index kept in memory and rebuilt by scanning on reopen
//! - Positional reads, so any number of readers share one handle
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        EventLog                           │
//! ├───────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐           ┌──────────────────┐      │
//! │  │ AsyncWriter      │           │ RecordReader     │      │
//! │  │ └ RecordWriter   │──spans──▶ │ (read_exact_at)  │      │
//! │  └────────┬─────────┘           └────────┬─────────┘      │
//! │           └──────────┬───────────────────┘                │
//! │                      ↓                                    │
//! │           ┌─────────────────────┐                         │
//! │           │  <agent>_<ts>.trace │                         │
//! │           └─────────────────────┘                         │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
mod store;

pub use store::{scan, RecordReader, RecordSpan, RecordWriter, SpanIndex};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// File extension of trace files.
pub const TRACE_EXTENSION: &str = "trace";

/// Replaces every character that is unsafe in a file name.
#[must_use]
pub fn sanitize_agent_id(agent: &str) -> String {
    let cleaned: String = agent
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "agent".to_string()
    } else {
        cleaned
    }
}

/// Deterministic path of the trace for `agent` created at `created_at`.
#[must_use]
pub fn trace_path(log_dir: &Path, agent: &str, created_at: DateTime<Utc>) -> PathBuf {
    log_dir.join(format!(
        "{}_{}.{TRACE_EXTENSION}",
        sanitize_agent_id(agent),
        created_at.format("%Y%m%d-%H%M%S-%3f")
    ))
}
