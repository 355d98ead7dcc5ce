//! Append-only trace file with an in-memory span index.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 0: codec frame]
//! [RECORD 1: codec frame]
//! ...
//! ```
//!
//! The writer appends frames through a buffered handle and publishes their
//! spans only after the buffer has been flushed, so any span a reader can
//! see is backed by bytes in the file. Readers use positional reads on a
//! shared handle and never take the writer's lock.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Read, Result as IoResult, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::{HistoryError, HistoryResult};
use crate::occurrence::Occurrence;

use super::codec;

/// Location of one record in the trace file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSpan {
    /// Byte offset of the frame.
    pub offset: u64,
    /// Total frame length including framing overhead.
    pub len: usize,
}

/// Durable spans, shared between the writer thread and readers.
pub type SpanIndex = Arc<RwLock<Vec<RecordSpan>>>;

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned span index lock")
}

/// Buffered appender for a fresh trace file.
pub struct RecordWriter {
    writer: BufWriter<File>,
    next_offset: u64,
    pending: Vec<RecordSpan>,
    spans: SpanIndex,
    sync_on_write: bool,
}

impl RecordWriter {
    /// Creates the trace file and writes its header. Fails if it already exists.
    pub fn create(path: &Path, spans: SpanIndex, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;

        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;
        writer.flush()?;
        if sync_on_write {
            writer.get_ref().sync_all()?;
        }

        Ok(Self {
            writer,
            next_offset: codec::HEADER_LEN,
            pending: Vec::new(),
            spans,
            sync_on_write,
        })
    }

    /// Buffers one record. It becomes visible to readers on [`Self::commit`].
    pub fn write(&mut self, occurrence: &Occurrence) -> IoResult<()> {
        let frame = codec::encode(occurrence).map_err(|e| IoError::new(ErrorKind::InvalidData, e))?;
        self.writer.write_all(&frame)?;
        self.pending.push(RecordSpan {
            offset: self.next_offset,
            len: frame.len(),
        });
        self.next_offset += frame.len() as u64;
        Ok(())
    }

    /// Flushes buffered records and publishes their spans.
    ///
    /// Returns the number of durable records.
    pub fn commit(&mut self) -> IoResult<usize> {
        self.writer.flush()?;
        if self.sync_on_write {
            self.writer.get_ref().sync_data()?;
        }

        let mut spans = self.spans.write().map_err(|_| poisoned())?;
        spans.append(&mut self.pending);
        Ok(spans.len())
    }

    /// Number of records buffered but not yet committed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Positional reader over a trace file.
#[derive(Debug)]
pub struct RecordReader {
    file: File,
    spans: SpanIndex,
}

impl RecordReader {
    /// Opens `path` for reading against an existing span index.
    pub fn open(path: &Path, spans: SpanIndex) -> IoResult<Self> {
        let file = File::open(path)?;
        Ok(Self { file, spans })
    }

    /// Number of records visible to readers.
    pub fn durable_len(&self) -> HistoryResult<usize> {
        self.spans
            .read()
            .map(|spans| spans.len())
            .map_err(|_| HistoryError::internal("poisoned span index lock"))
    }

    /// Reads and decodes record `index`.
    ///
    /// # Errors
    /// `IndexOutOfRange` if the record is not durable yet, `Io` on read
    /// failure, `Codec` if the stored frame is damaged.
    pub fn read(&self, index: usize) -> HistoryResult<Occurrence> {
        let span = {
            let spans = self
                .spans
                .read()
                .map_err(|_| HistoryError::internal("poisoned span index lock"))?;
            spans.get(index).copied().ok_or(HistoryError::IndexOutOfRange {
                index,
                len: spans.len(),
            })?
        };

        let mut frame = vec![0u8; span.len];
        read_exact_at(&self.file, &mut frame, span.offset)?;
        codec::decode(&frame).map_err(|e| HistoryError::codec(index, e))
    }
}

/// Rebuilds the span index of an existing trace file by walking frame
/// headers. A truncated final frame (a crash mid-write) ends the walk;
/// everything before it stays readable. A frame whose length cannot be
/// read ends the walk too, but is kept as a damaged record whose read
/// fails with a codec error.
///
/// # Errors
/// `NotATrace` if the header is missing or has the wrong magic, `Io` on
/// read failure.
pub fn scan(path: &Path) -> HistoryResult<Vec<RecordSpan>> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    if codec::read_header(&mut reader).is_err() {
        return Err(HistoryError::NotATrace {
            path: path.to_path_buf(),
        });
    }

    let mut spans = Vec::new();
    let mut offset = codec::HEADER_LEN;

    loop {
        if offset >= file_size {
            break;
        }

        let mut prefix = [0u8; 5];
        match reader.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!(path = %path.display(), offset, "truncated record header at end of trace");
                break;
            }
            Err(e) => return Err(e.into()),
        }

        let len = match codec::payload_len(prefix) {
            Ok(len) => len,
            Err(e) if offset + codec::FRAME_OVERHEAD as u64 > file_size => {
                tracing::warn!(path = %path.display(), offset, error = %e, "torn record at end of trace");
                break;
            }
            Err(e) => {
                // Later frames cannot be located. Keep one damaged record so
                // reading it reports the failure instead of the log shrinking.
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    index = spans.len(),
                    error = %e,
                    "unreadable record length, records after it are unreachable"
                );
                spans.push(RecordSpan {
                    offset,
                    len: codec::FRAME_OVERHEAD,
                });
                break;
            }
        };

        let frame_len = codec::FRAME_OVERHEAD + len;
        if offset + frame_len as u64 > file_size {
            tracing::warn!(path = %path.display(), offset, "truncated record at end of trace");
            break;
        }

        // Skip payload and checksum; they are verified when the record is read.
        let skip = (len + 4) as u64;
        let skipped = std::io::copy(&mut (&mut reader).take(skip), &mut std::io::sink())?;
        if skipped != skip {
            break;
        }

        spans.push(RecordSpan {
            offset,
            len: frame_len,
        });
        offset += frame_len as u64;
    }

    Ok(spans)
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> IoResult<()> {
    use std::os::unix::fs::FileExt;

    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> IoResult<()> {
    use std::os::windows::fs::FileExt;

    let mut done = 0;
    while done < buf.len() {
        let n = file.seek_read(&mut buf[done..], offset + done as u64)?;
        if n == 0 {
            return Err(IoError::new(ErrorKind::UnexpectedEof, "record extends past end of file"));
        }
        done += n;
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_exact_at(_file: &File, _buf: &mut [u8], _offset: u64) -> IoResult<()> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "positional reads not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::program::SourcePosition;
    use crate::term::Signature;

    fn enter(line: u32) -> Occurrence {
        Occurrence::module_enter(SourcePosition::new("m.mod2g", line, 1), Signature::new("main", 0))
    }

    #[test]
    fn test_spans_published_only_on_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.trace");
        let spans = SpanIndex::default();

        let mut writer = RecordWriter::create(&path, Arc::clone(&spans), false).unwrap();
        let reader = RecordReader::open(&path, Arc::clone(&spans)).unwrap();

        writer.write(&enter(1)).unwrap();
        writer.write(&enter(2)).unwrap();
        assert_eq!(writer.pending(), 2);
        assert_eq!(reader.durable_len().unwrap(), 0);
        assert!(matches!(reader.read(0), Err(HistoryError::IndexOutOfRange { .. })));

        assert_eq!(writer.commit().unwrap(), 2);
        assert_eq!(reader.read(1).unwrap(), enter(2));
        assert_eq!(reader.read(0).unwrap(), enter(1));
    }

    #[test]
    fn test_scan_rebuilds_index() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.trace");
        let spans = SpanIndex::default();
        {
            let mut writer = RecordWriter::create(&path, Arc::clone(&spans), true).unwrap();
            for line in 1..=3 {
                writer.write(&enter(line)).unwrap();
            }
            writer.commit().unwrap();
        }

        let rebuilt = scan(&path).unwrap();
        assert_eq!(rebuilt, *spans.read().unwrap());
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.trace");
        std::fs::write(&path, b"occupied").unwrap();
        let err = RecordWriter::create(&path, SpanIndex::default(), false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_scan_keeps_unreadable_length_as_damaged_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("e.trace");
        let spans = SpanIndex::default();
        {
            let mut writer = RecordWriter::create(&path, Arc::clone(&spans), true).unwrap();
            for line in 1..=3 {
                writer.write(&enter(line)).unwrap();
            }
            writer.commit().unwrap();
        }
        let second = spans.read().unwrap()[1];
        {
            use std::io::{Seek, SeekFrom};
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(second.offset + 1)).unwrap();
            file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }

        let rebuilt = scan(&path).unwrap();
        assert_eq!(rebuilt.len(), 2);
        let reader = RecordReader::open(&path, Arc::new(RwLock::new(rebuilt))).unwrap();
        assert_eq!(reader.read(0).unwrap(), enter(1));
        assert!(matches!(
            reader.read(1),
            Err(HistoryError::Codec {
                index: 1,
                source: crate::error::CodecError::TooLarge { .. },
            })
        ));
    }

    #[test]
    fn test_scan_ignores_torn_length_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.trace");
        {
            let mut writer = RecordWriter::create(&path, SpanIndex::default(), true).unwrap();
            writer.write(&enter(1)).unwrap();
            writer.commit().unwrap();
        }
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            // A prefix with a garbage length and nothing after it.
            file.write_all(&[codec::RECORD_VERSION, 0xff, 0xff, 0xff, 0xff]).unwrap();
        }

        assert_eq!(scan(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_scan_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.trace");
        std::fs::write(&path, b"KYRO\x01garbage").unwrap();
        assert!(matches!(scan(&path), Err(HistoryError::NotATrace { .. })));
    }
}
