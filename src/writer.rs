//! Background writer for event logs.
//!
//! `append` hands an occurrence to a bounded queue and returns; a dedicated
//! thread drains the queue in batches, writes the records and publishes
//! them to readers. A full queue blocks the caller (backpressure), it never
//! drops. `sync` is the only call that waits for durability.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{HistoryError, HistoryResult};
use crate::occurrence::Occurrence;
use crate::storage::RecordWriter;

enum WriterMsg {
    Append(Box<Occurrence>),
    Sync(Sender<Result<usize, String>>),
}

/// Handle to the writer thread of one event log.
#[derive(Debug)]
pub struct AsyncWriter {
    tx: Option<Sender<WriterMsg>>,
    failure: Arc<Mutex<Option<String>>>,
    join: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for WriterMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append(occurrence) => write!(f, "Append({occurrence})"),
            Self::Sync(_) => write!(f, "Sync"),
        }
    }
}

impl AsyncWriter {
    /// Spawns the writer thread.
    ///
    /// # Errors
    /// Returns `Io` if the thread cannot be spawned.
    pub fn spawn(writer: RecordWriter, queue_capacity: usize, batch_limit: usize) -> HistoryResult<Self> {
        let (tx, rx) = bounded::<WriterMsg>(queue_capacity.max(1));
        let failure = Arc::new(Mutex::new(None));

        let thread_failure = Arc::clone(&failure);
        let batch_limit = batch_limit.max(1);
        let join = thread::Builder::new()
            .name("cogtrace-writer".to_string())
            .spawn(move || worker_loop(writer, rx, batch_limit, thread_failure))?;

        Ok(Self {
            tx: Some(tx),
            failure,
            join: Some(join),
        })
    }

    /// Enqueues an occurrence; blocks only while the queue is full.
    ///
    /// # Errors
    /// `WriterFailed` if an earlier write failed, `Closed` after `close`.
    pub fn append(&self, occurrence: Occurrence) -> HistoryResult<()> {
        self.check_failure()?;
        let tx = self.tx.as_ref().ok_or(HistoryError::Closed)?;
        tx.send(WriterMsg::Append(Box::new(occurrence)))
            .map_err(|_| self.disconnected())
    }

    /// Blocks until everything enqueued so far is durable.
    ///
    /// Returns the number of durable records.
    ///
    /// # Errors
    /// `WriterFailed` if any write failed, `Closed` after `close`.
    pub fn sync(&self) -> HistoryResult<usize> {
        let tx = self.tx.as_ref().ok_or(HistoryError::Closed)?;
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(WriterMsg::Sync(reply_tx))
            .map_err(|_| self.disconnected())?;
        reply_rx
            .recv()
            .map_err(|_| self.disconnected())?
            .map_err(|message| HistoryError::WriterFailed { message })
    }

    /// Drains the queue, stops the thread and releases the file.
    ///
    /// # Errors
    /// `WriterFailed` if any write failed.
    pub fn close(&mut self) -> HistoryResult<usize> {
        let durable = self.sync();
        self.shutdown();
        durable
    }

    /// Returns true once `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    fn shutdown(&mut self) {
        // Dropping the only sender ends the worker loop after it drains.
        self.tx.take();
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                tracing::error!("trace writer thread panicked");
            }
        }
    }

    fn check_failure(&self) -> HistoryResult<()> {
        let guard = self
            .failure
            .lock()
            .map_err(|_| HistoryError::internal("poisoned writer failure lock"))?;
        match guard.as_ref() {
            Some(message) => Err(HistoryError::WriterFailed {
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn disconnected(&self) -> HistoryError {
        match self.check_failure() {
            Err(e) => e,
            Ok(()) => HistoryError::WriterFailed {
                message: "writer thread is gone".to_string(),
            },
        }
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        // The worker flushes whatever is queued before exiting.
        self.shutdown();
    }
}

fn worker_loop(
    mut writer: RecordWriter,
    rx: Receiver<WriterMsg>,
    batch_limit: usize,
    failure: Arc<Mutex<Option<String>>>,
) {
    tracing::debug!("trace writer started");
    let mut failed: Option<String> = None;

    while let Ok(first) = rx.recv() {
        let mut batch = Vec::with_capacity(batch_limit.min(64));
        batch.push(first);
        while batch.len() < batch_limit {
            match rx.try_recv() {
                Ok(msg) => batch.push(msg),
                Err(_) => break,
            }
        }

        let mut replies = Vec::new();
        let mut written = 0usize;
        for msg in batch {
            match msg {
                WriterMsg::Append(occurrence) => {
                    if failed.is_some() {
                        continue;
                    }
                    match writer.write(&occurrence) {
                        Ok(()) => written += 1,
                        Err(e) => failed = Some(record_failure(&failure, &format!("write failed: {e}"))),
                    }
                }
                WriterMsg::Sync(reply) => replies.push(reply),
            }
        }

        let mut durable = 0;
        if failed.is_none() {
            match writer.commit() {
                Ok(n) => {
                    durable = n;
                    if written > 0 {
                        tracing::debug!(records = written, durable, "trace batch committed");
                    }
                }
                Err(e) => failed = Some(record_failure(&failure, &format!("flush failed: {e}"))),
            }
        }

        for reply in replies {
            let outcome = match &failed {
                Some(message) => Err(message.clone()),
                None => Ok(durable),
            };
            let _ = reply.send(outcome);
        }
    }

    tracing::debug!(failed = failed.is_some(), "trace writer stopped");
}

fn record_failure(slot: &Arc<Mutex<Option<String>>>, message: &str) -> String {
    tracing::error!(error = message, "trace writer lost its backing store");
    if let Ok(mut guard) = slot.lock() {
        guard.get_or_insert_with(|| message.to_string());
    }
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::program::SourcePosition;
    use crate::storage::{RecordReader, SpanIndex};
    use crate::term::Signature;

    fn enter(line: u32) -> Occurrence {
        Occurrence::module_enter(SourcePosition::new("w.mod2g", line, 1), Signature::new("main", 0))
    }

    #[test]
    fn test_sync_makes_appends_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.trace");
        let spans = SpanIndex::default();
        let record_writer = RecordWriter::create(&path, Arc::clone(&spans), false).unwrap();
        let reader = RecordReader::open(&path, Arc::clone(&spans)).unwrap();

        let writer = AsyncWriter::spawn(record_writer, 2, 8).unwrap();
        for line in 0..50 {
            writer.append(enter(line)).unwrap();
        }
        assert_eq!(writer.sync().unwrap(), 50);
        assert_eq!(reader.read(49).unwrap(), enter(49));
    }

    #[test]
    fn test_close_rejects_further_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.trace");
        let spans = SpanIndex::default();
        let record_writer = RecordWriter::create(&path, Arc::clone(&spans), true).unwrap();

        let mut writer = AsyncWriter::spawn(record_writer, 16, 4).unwrap();
        writer.append(enter(1)).unwrap();
        assert_eq!(writer.close().unwrap(), 1);
        assert!(writer.is_closed());
        assert!(matches!(writer.append(enter(2)), Err(HistoryError::Closed)));
        assert!(matches!(writer.sync(), Err(HistoryError::Closed)));
    }

    #[test]
    fn test_drop_flushes_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.trace");
        {
            let record_writer = RecordWriter::create(&path, SpanIndex::default(), false).unwrap();
            let writer = AsyncWriter::spawn(record_writer, 4, 1).unwrap();
            for line in 0..10 {
                writer.append(enter(line)).unwrap();
            }
        }
        assert_eq!(crate::storage::scan(&path).unwrap().len(), 10);
    }
}
