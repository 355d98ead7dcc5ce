//! Configuration for execution-history storage.

use std::path::PathBuf;

use crate::error::{HistoryError, HistoryResult};

/// Configuration shared by every event log a [`crate::HistoryRegistry`] opens.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Directory holding one trace file per agent run.
    pub log_dir: PathBuf,
    /// Maximum number of occurrences queued for the background writer
    /// before `append` blocks (backpressure, never silent drop).
    pub queue_capacity: usize,
    /// Maximum number of records written between two flushes.
    pub batch_limit: usize,
    /// Whether to fsync after every flushed batch (slower but safer).
    pub sync_on_write: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("traces"),
            queue_capacity: 4096,
            batch_limit: 256,
            sync_on_write: false,
        }
    }
}

impl HistoryConfig {
    /// Creates a default configuration rooted at `log_dir`.
    #[must_use]
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the writer queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the maximum batch size between flushes.
    #[must_use]
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Enables or disables fsync after each batch.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the log directory is empty or a capacity is zero.
    pub fn validate(self) -> HistoryResult<Self> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(HistoryError::InvalidConfig {
                message: "log_dir must not be empty".to_string(),
            });
        }

        if self.queue_capacity == 0 {
            return Err(HistoryError::InvalidConfig {
                message: "queue_capacity must be at least 1".to_string(),
            });
        }

        if self.batch_limit == 0 {
            return Err(HistoryError::InvalidConfig {
                message: "batch_limit must be at least 1".to_string(),
            });
        }

        Ok(self)
    }
}
