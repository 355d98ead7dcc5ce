//! Per-agent event log table.
//!
//! The registry is an ordinary owned value: whoever manages agent lifecycle
//! creates it, opens a log when an agent is created and disposes the log
//! when the agent is disposed. Components that need per-agent history are
//! handed the registry (or a log from it) explicitly.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::HistoryConfig;
use crate::error::{HistoryError, HistoryResult};
use crate::log::EventLog;
use crate::storage::{sanitize_agent_id, trace_path, TRACE_EXTENSION};

/// Length of the `%Y%m%d-%H%M%S-%3f` timestamp in trace file names.
const TIMESTAMP_LEN: usize = 19;

/// Table of writable event logs keyed by agent identifier.
#[derive(Debug)]
pub struct HistoryRegistry {
    config: HistoryConfig,
    logs: HashMap<String, EventLog>,
}

impl HistoryRegistry {
    /// Creates an empty registry.
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: HistoryConfig) -> HistoryResult<Self> {
        Ok(Self {
            config: config.validate()?,
            logs: HashMap::new(),
        })
    }

    /// The configuration logs are opened with.
    #[must_use]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Opens a fresh log for a newly created agent.
    ///
    /// # Errors
    /// `AgentAlreadyOpen` if the agent already has a live log, `Io` if the
    /// trace file cannot be created.
    pub fn open(&mut self, agent: &str) -> HistoryResult<&mut EventLog> {
        self.open_at(agent, Utc::now())
    }

    /// Like [`Self::open`] with an explicit creation timestamp.
    ///
    /// # Errors
    /// See [`Self::open`].
    pub fn open_at(&mut self, agent: &str, created_at: DateTime<Utc>) -> HistoryResult<&mut EventLog> {
        if self.logs.contains_key(agent) {
            return Err(HistoryError::AgentAlreadyOpen {
                agent: agent.to_string(),
            });
        }

        let path = trace_path(&self.config.log_dir, agent, created_at);
        let log = EventLog::create(&path, &self.config)?;
        tracing::info!(agent, path = %path.display(), "agent history opened");

        Ok(self.logs.entry(agent.to_string()).or_insert(log))
    }

    /// The live log of `agent`.
    #[must_use]
    pub fn get(&self, agent: &str) -> Option<&EventLog> {
        self.logs.get(agent)
    }

    /// The live log of `agent`, mutably.
    pub fn get_mut(&mut self, agent: &str) -> Option<&mut EventLog> {
        self.logs.get_mut(agent)
    }

    /// Agents with a live log.
    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.logs.keys().map(String::as_str)
    }

    /// Finishes and closes the log of a disposed agent.
    ///
    /// Returns the trace file so it can be reopened for inspection.
    ///
    /// # Errors
    /// `UnknownAgent` if the agent has no live log, `WriterFailed` if
    /// buffered occurrences could not be made durable.
    pub fn dispose(&mut self, agent: &str) -> HistoryResult<PathBuf> {
        let mut log = self.logs.remove(agent).ok_or_else(|| HistoryError::UnknownAgent {
            agent: agent.to_string(),
        })?;
        let path = log.path().to_path_buf();
        log.finish(true)?;
        tracing::info!(agent, records = log.len(), "agent history disposed");
        Ok(path)
    }

    /// Disposes every live log. All logs are closed even if one fails; the
    /// first failure is returned.
    ///
    /// # Errors
    /// The first `dispose` error encountered.
    pub fn dispose_all(&mut self) -> HistoryResult<()> {
        let agents: Vec<String> = self.logs.keys().cloned().collect();
        let mut first_error = None;
        for agent in agents {
            if let Err(e) = self.dispose(&agent) {
                tracing::error!(agent = %agent, error = %e, "failed to dispose agent history");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reopens a finished trace read-only.
    ///
    /// # Errors
    /// See [`EventLog::open_read_only`].
    pub fn inspect(&self, path: impl AsRef<Path>) -> HistoryResult<EventLog> {
        EventLog::open_read_only(path)
    }

    /// Trace files of every recorded run of `agent`, oldest first.
    ///
    /// # Errors
    /// `Io` if the log directory cannot be listed.
    pub fn runs_for(&self, agent: &str) -> HistoryResult<Vec<PathBuf>> {
        let dir = &self.config.log_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}_", sanitize_agent_id(agent));
        let mut runs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TRACE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(stamp) = stem.strip_prefix(&prefix) else {
                continue;
            };
            // Guards against agents whose names share a prefix ("bob" vs "bob_2").
            if stamp.len() == TIMESTAMP_LEN && stamp.chars().all(|c| c.is_ascii_digit() || c == '-') {
                runs.push(path);
            }
        }
        runs.sort();
        Ok(runs)
    }
}
