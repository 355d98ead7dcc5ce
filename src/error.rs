//! Error types for cogtrace.
//!
//! All errors are strongly typed using thiserror. Cursor boundary errors are
//! ordinary, recoverable outcomes (a debugger simply disables its step
//! button); storage I/O failures are propagated to the caller of the
//! operation that hit them; codec errors are reported per record so a reader
//! can decide to skip or abort.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The replay cursor cannot move any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CursorError {
    #[error("cannot step back: cursor is at the start of the log")]
    AtStart,

    #[error("cannot step forward: cursor is at the end of the log")]
    AtEnd,
}

/// Live agent state rejected an apply or undo.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("module stack is empty")]
    ModuleStackEmpty,

    #[error("expected module '{expected}' on top of the stack, found '{found}'")]
    ModuleMismatch {
        expected: String,
        found: String,
    },

    #[error("state rejected modification: {reason}")]
    Rejected {
        reason: String,
    },
}

/// A stored record could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported record version: {found} (expected {expected})")]
    UnsupportedVersion {
        found: u8,
        expected: u8,
    },

    #[error("CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)")]
    ChecksumMismatch {
        stored: u32,
        computed: u32,
    },

    #[error("record size {size} exceeds maximum {max}")]
    TooLarge {
        size: usize,
        max: usize,
    },

    #[error("record is truncated")]
    Truncated,

    #[error("malformed record payload: {0}")]
    Malformed(String),
}

/// Top-level error type for cogtrace.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error("live state error: {0}")]
    State(#[from] StateError),

    #[error("record {index} could not be decoded: {source}")]
    Codec {
        index: usize,
        #[source]
        source: CodecError,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("log is read-only")]
    ReadOnly,

    #[error("log has been closed")]
    Closed,

    #[error("background writer failed: {message}")]
    WriterFailed {
        message: String,
    },

    #[error("index {index} is out of range (length {len})")]
    IndexOutOfRange {
        index: usize,
        len: usize,
    },

    #[error("no event log is open for agent '{agent}'")]
    UnknownAgent {
        agent: String,
    },

    #[error("an event log is already open for agent '{agent}'")]
    AgentAlreadyOpen {
        agent: String,
    },

    #[error("not a trace file: {path}")]
    NotATrace {
        path: PathBuf,
    },

    #[error("invalid configuration: {message}")]
    InvalidConfig {
        message: String,
    },

    #[error("internal error: {message}")]
    Internal {
        message: String,
    },
}

impl HistoryError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn codec(index: usize, source: CodecError) -> Self {
        Self::Codec { index, source }
    }

    /// Returns true if this is a cursor boundary error.
    #[must_use]
    pub const fn is_boundary(&self) -> bool {
        matches!(self, Self::Cursor(_))
    }

    /// Returns true if the durable medium itself was lost and the run
    /// should be aborted.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::WriterFailed { .. } | Self::Io(_))
    }
}

/// Result type alias for cogtrace operations.
pub type HistoryResult<T> = Result<T, HistoryError>;
