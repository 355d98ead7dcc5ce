//! The event log: a durable, cursor-addressed sequence of occurrences.
//!
//! A writable log belongs to one running agent. It appends through an
//! [`AsyncWriter`] and keeps its cursor at the end while the agent runs.
//! While the agent is paused, a debugger moves the cursor with
//! [`EventLog::step_back`] and [`EventLog::step_forward`], undoing and
//! re-applying occurrences against the live state. Once finished, the same
//! file can be reopened read-only and shared between readers.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::HistoryConfig;
use crate::error::{CursorError, HistoryError, HistoryResult};
use crate::occurrence::Occurrence;
use crate::program::{ProgramMap, SourcePosition};
use crate::state::AgentState;
use crate::storage::{self, RecordReader, RecordWriter, SpanIndex};
use crate::term::Signature;
use crate::writer::AsyncWriter;

/// Which matches [`EventLog::search`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Every matching index.
    All,
    /// Only the earliest matching index.
    First,
    /// Only the latest matching index.
    Last,
}

/// Map-independent signature data, built once per occurrence and extended
/// as the log grows. Program-map signatures are merged in per query, so
/// every call sees the map it was given.
#[derive(Debug, Default)]
struct SignatureCache {
    entries: Vec<IndexedSignatures>,
    payload_universe: BTreeSet<Signature>,
    sources: BTreeSet<SourcePosition>,
}

#[derive(Debug)]
struct IndexedSignatures {
    source: SourcePosition,
    payload: BTreeSet<Signature>,
}

/// Durable, append-only, cursor-addressed sequence of occurrences for one
/// agent run.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    reader: Option<RecordReader>,
    writer: Option<AsyncWriter>,
    writable: bool,
    len: usize,
    counter: usize,
    signatures: Mutex<SignatureCache>,
}

impl EventLog {
    /// Creates a new writable log at `path`. The file must not exist yet.
    ///
    /// # Errors
    /// `Io` if the directory or file cannot be created.
    pub fn create(path: impl AsRef<Path>, config: &HistoryConfig) -> HistoryResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let spans = SpanIndex::default();
        let record_writer = RecordWriter::create(path, Arc::clone(&spans), config.sync_on_write)?;
        let reader = RecordReader::open(path, spans)?;
        let writer = AsyncWriter::spawn(record_writer, config.queue_capacity, config.batch_limit)?;

        tracing::info!(path = %path.display(), "event log created");

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            writer: Some(writer),
            writable: true,
            len: 0,
            counter: 0,
            signatures: Mutex::new(SignatureCache::default()),
        })
    }

    /// Reopens a finished run for inspection. The cursor starts at 0: no
    /// occurrence has been applied to whatever state the caller replays into.
    ///
    /// # Errors
    /// `NotATrace` for foreign files, `Io` on read failure.
    pub fn open_read_only(path: impl AsRef<Path>) -> HistoryResult<Self> {
        let path = path.as_ref();
        let spans = storage::scan(path)?;
        let len = spans.len();
        let reader = RecordReader::open(path, Arc::new(std::sync::RwLock::new(spans)))?;

        tracing::info!(path = %path.display(), records = len, "event log opened read-only");

        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
            writer: None,
            writable: false,
            len,
            counter: 0,
            signatures: Mutex::new(SignatureCache::default()),
        })
    }

    /// Backing file of this log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical length, including occurrences not yet durable.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Cursor position: how many occurrences are currently applied.
    #[must_use]
    pub fn index(&self) -> usize {
        self.counter
    }

    /// Returns true for logs created by [`EventLog::create`].
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns true once the backing store has been released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }

    /// Number of occurrences already readable from the backing file.
    ///
    /// # Errors
    /// `Closed` after `finish(true)`.
    pub fn durable_len(&self) -> HistoryResult<usize> {
        self.reader()?.durable_len()
    }

    /// Enqueues an occurrence for durable storage and returns immediately.
    ///
    /// The logical length grows at once. If the cursor was at the end (the
    /// agent is running) it stays at the end.
    ///
    /// # Errors
    /// `ReadOnly` for reopened logs, `Closed` after `finish(true)`,
    /// `WriterFailed` if the backing store was lost.
    pub fn append(&mut self, occurrence: Occurrence) -> HistoryResult<()> {
        if !self.writable {
            return Err(HistoryError::ReadOnly);
        }
        let writer = self.writer.as_ref().ok_or(HistoryError::Closed)?;
        writer.append(occurrence)?;

        let at_end = self.counter == self.len;
        self.len += 1;
        if at_end {
            self.counter += 1;
        }
        Ok(())
    }

    /// Blocks until every appended occurrence is durable.
    ///
    /// Returns the number of durable occurrences.
    ///
    /// # Errors
    /// `WriterFailed` if the backing store was lost, `Closed` after close.
    pub fn sync(&self) -> HistoryResult<usize> {
        match &self.writer {
            Some(writer) => writer.sync(),
            None => self.durable_len(),
        }
    }

    /// Reads the occurrence at `index`, waiting for the writer if it is
    /// not durable yet.
    ///
    /// # Errors
    /// `IndexOutOfRange`, `Closed`, `Io`, or `Codec` for a damaged record.
    pub fn get(&self, index: usize) -> HistoryResult<Occurrence> {
        if index >= self.len {
            return Err(HistoryError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        let reader = self.reader()?;
        if index >= reader.durable_len()? {
            self.sync()?;
        }
        reader.read(index)
    }

    /// Iterates every occurrence in order. Each item is decoded on its own,
    /// so a damaged record does not hide the ones after it.
    pub fn iter(&self) -> impl Iterator<Item = HistoryResult<Occurrence>> + '_ {
        (0..self.len).map(move |index| self.get(index))
    }

    /// Undoes the occurrence before the cursor and moves the cursor back.
    ///
    /// # Errors
    /// `AtStart` if nothing is applied. Read and state errors leave the
    /// cursor where it was.
    pub fn step_back<S: AgentState + ?Sized>(&mut self, state: &mut S) -> HistoryResult<Occurrence> {
        if self.counter == 0 {
            return Err(CursorError::AtStart.into());
        }
        let occurrence = self.get(self.counter - 1)?;
        occurrence.undo(state)?;
        self.counter -= 1;
        Ok(occurrence)
    }

    /// Re-applies the occurrence at the cursor and moves the cursor forward.
    ///
    /// # Errors
    /// `AtEnd` if everything is applied. Read and state errors leave the
    /// cursor where it was.
    pub fn step_forward<S: AgentState + ?Sized>(&mut self, state: &mut S) -> HistoryResult<Occurrence> {
        if self.counter >= self.len {
            return Err(CursorError::AtEnd.into());
        }
        let occurrence = self.get(self.counter)?;
        occurrence.apply(state)?;
        self.counter += 1;
        Ok(occurrence)
    }

    /// Steps back or forward until the cursor is at `target`.
    ///
    /// # Errors
    /// `IndexOutOfRange` if `target > len()`; otherwise the first failing
    /// step's error, with the cursor left after the last successful step.
    pub fn step_to<S: AgentState + ?Sized>(&mut self, target: usize, state: &mut S) -> HistoryResult<()> {
        if target > self.len {
            return Err(HistoryError::IndexOutOfRange {
                index: target,
                len: self.len,
            });
        }
        while self.counter > target {
            self.step_back(state)?;
        }
        while self.counter < target {
            self.step_forward(state)?;
        }
        Ok(())
    }

    /// The occurrence the next `step_forward` would apply. At the end of a
    /// fully replayed log this is the last occurrence.
    ///
    /// # Errors
    /// `AtEnd` only if the log is empty.
    pub fn current(&self) -> HistoryResult<Occurrence> {
        if self.counter < self.len {
            self.get(self.counter)
        } else if self.len > 0 {
            self.get(self.len - 1)
        } else {
            Err(CursorError::AtEnd.into())
        }
    }

    /// Every signature any occurrence in the log concerns.
    ///
    /// Payload signatures are decoded once per occurrence and cached; later
    /// calls only decode occurrences appended since. Signatures of the
    /// program elements are looked up in `map` on every call.
    ///
    /// # Errors
    /// Read or codec errors of the records being indexed.
    pub fn lookup_universe(&self, map: &ProgramMap) -> HistoryResult<BTreeSet<Signature>> {
        let cache = self.refresh_signatures()?;
        let mut universe = cache.payload_universe.clone();
        for source in &cache.sources {
            universe.extend(map.signatures_at(source));
        }
        Ok(universe)
    }

    /// Finds occurrences concerning any of `signatures`.
    ///
    /// The result has one slot per index in `[0, len)`; non-matching slots
    /// are `None`. An empty query matches everything.
    ///
    /// # Errors
    /// Read or codec errors of the indexed or returned records.
    pub fn search(
        &self,
        map: &ProgramMap,
        signatures: &BTreeSet<Signature>,
        mode: SearchMode,
    ) -> HistoryResult<BTreeMap<usize, Option<Occurrence>>> {
        let hits: Vec<usize> = {
            let cache = self.refresh_signatures()?;
            let matching_sources: BTreeSet<&SourcePosition> = cache
                .sources
                .iter()
                .filter(|source| !map.signatures_at(source).is_disjoint(signatures))
                .collect();
            let matches = |i: &usize| {
                let entry = &cache.entries[*i];
                signatures.is_empty()
                    || !entry.payload.is_disjoint(signatures)
                    || matching_sources.contains(&entry.source)
            };
            let mut indices = 0..cache.entries.len();
            match mode {
                SearchMode::All => indices.filter(matches).collect(),
                SearchMode::First => indices.find(matches).into_iter().collect(),
                SearchMode::Last => indices.rev().find(matches).into_iter().collect(),
            }
        };

        let mut out: BTreeMap<usize, Option<Occurrence>> = (0..self.len).map(|i| (i, None)).collect();
        for index in hits {
            out.insert(index, Some(self.get(index)?));
        }
        Ok(out)
    }

    /// Drains the writer; with `close`, also releases the backing store.
    ///
    /// A writable log must be finished with `close = true` exactly once
    /// before the agent is disposed.
    ///
    /// # Errors
    /// `WriterFailed` if buffered occurrences could not be made durable,
    /// `Closed` if the log was already closed.
    pub fn finish(&mut self, close: bool) -> HistoryResult<()> {
        if self.is_closed() {
            return Err(HistoryError::Closed);
        }

        let outcome = match (&mut self.writer, close) {
            (Some(writer), true) => writer.close().map(|_| ()),
            (Some(writer), false) => writer.sync().map(|_| ()),
            (None, _) => Ok(()),
        };

        if close {
            self.writer = None;
            self.reader = None;
            tracing::info!(path = %self.path.display(), records = self.len, "event log closed");
        }
        outcome
    }

    fn reader(&self) -> HistoryResult<&RecordReader> {
        self.reader.as_ref().ok_or(HistoryError::Closed)
    }

    fn refresh_signatures(&self) -> HistoryResult<std::sync::MutexGuard<'_, SignatureCache>> {
        let mut cache = self
            .signatures
            .lock()
            .map_err(|_| HistoryError::internal("poisoned signature cache lock"))?;
        for index in cache.entries.len()..self.len {
            let occurrence = self.get(index)?;
            let payload = occurrence.payload_signatures();
            cache.payload_universe.extend(payload.iter().cloned());
            cache.sources.insert(occurrence.source().clone());
            cache.entries.push(IndexedSignatures {
                source: occurrence.source().clone(),
                payload,
            });
        }
        Ok(cache)
    }
}
