//! Durable FIFO store
//!
//! `DeliveryQueue` keeps pending items in arrival order. When a storage
//! directory is supplied, every `push`/`pop` is appended to a JSON-lines log
//! which is replayed on open, so the queue survives process restarts. With
//! no directory the queue is memory-only and lost on restart.
//!
//! The log grows by one record per operation; once the number of dead
//! (popped) records crosses the compaction threshold the log is rewritten to
//! contain only the live items. A torn trailing record (crash mid-write) is
//! skipped with a warning rather than failing the open.

use crate::error::QueueError;
use crate::item::QueueItem;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOG_FILE_NAME: &str = "delivery-queue.jsonl";

/// Dead records tolerated before the log is rewritten
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 512;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Record {
    Push { item: QueueItem },
    Pop,
}

#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    file: File,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<QueueItem>,
    log: Option<LogFile>,
    dead_records: usize,
    compaction_threshold: usize,
}

/// Ordered durable FIFO of [`QueueItem`]s
///
/// Cloning the queue hands out another handle to the same store, so
/// arbitrary producer threads can `push` while the single worker peeks and
/// pops.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    inner: Arc<Mutex<Inner>>,
}

impl DeliveryQueue {
    /// Create a memory-only queue (lost on restart)
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::new(),
                log: None,
                dead_records: 0,
                compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            })),
        }
    }

    /// Open (or create) a file-backed queue under `dir`
    ///
    /// Replays the existing log, compacts away any dead records left behind
    /// by the previous run, and reopens the log for appending.
    ///
    /// # Errors
    /// Returns `QueueError::Io` if the directory or log file cannot be
    /// created or read.
    pub fn open(dir: impl AsRef<Path>, compaction_threshold: usize) -> Result<Self, QueueError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(LOG_FILE_NAME);

        let replayed = replay(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let queue = Self {
            inner: Arc::new(Mutex::new(Inner {
                items: replayed.items,
                log: Some(LogFile { path, file }),
                dead_records: replayed.dead_records,
                compaction_threshold: compaction_threshold.max(1),
            })),
        };

        // Rewrite the log before the first append: dead records must not
        // accumulate across restarts, and appending after a torn tail would
        // corrupt the next record.
        if replayed.dead_records > 0 || replayed.torn_tail {
            let mut inner = queue.inner.lock();
            compact(&mut inner)?;
        }

        Ok(queue)
    }

    /// Append an item at the tail
    ///
    /// # Errors
    /// Returns `QueueError` if the push record cannot be written to the log;
    /// the in-memory queue is not modified in that case.
    pub fn push(&self, item: QueueItem) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if let Some(log) = inner.log.as_mut() {
            append(&mut log.file, &Record::Push { item: item.clone() })?;
        }
        inner.items.push_back(item);
        Ok(())
    }

    /// Copy of the head item, without removing it
    #[must_use]
    pub fn peek(&self) -> Option<QueueItem> {
        self.inner.lock().items.front().cloned()
    }

    /// Remove and return the head item
    ///
    /// A failed pop-record write puts the head back, so the caller can retry
    /// the same item later.
    ///
    /// # Errors
    /// Returns `QueueError` if the pop record or a triggered compaction
    /// cannot be written.
    pub fn pop(&self) -> Result<Option<QueueItem>, QueueError> {
        let mut inner = self.inner.lock();
        let Some(item) = inner.items.pop_front() else {
            return Ok(None);
        };

        let appended = match inner.log.as_mut() {
            Some(log) => append(&mut log.file, &Record::Pop),
            None => return Ok(Some(item)),
        };
        if let Err(err) = appended {
            inner.items.push_front(item);
            return Err(err);
        }

        inner.dead_records += 1;
        if inner.dead_records >= inner.compaction_threshold {
            compact(&mut inner)?;
        }
        Ok(Some(item))
    }

    /// Atomically move the head to the tail, replaced by `item`
    ///
    /// This is the retry path: the worker hands in the updated copy of the
    /// head it just processed. Both log records are written before the
    /// in-memory queue changes, so a failed write leaves the head in place
    /// and never loses the item.
    ///
    /// # Errors
    /// Returns `QueueError` if the log records or a triggered compaction
    /// cannot be written.
    pub fn requeue(&self, item: QueueItem) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.items.is_empty() {
            tracing::warn!("requeue of {} with no head item, dropping", item.key());
            return Ok(());
        }

        if let Some(log) = inner.log.as_mut() {
            append(&mut log.file, &Record::Push { item: item.clone() })?;
            append(&mut log.file, &Record::Pop)?;
        }
        let _ = inner.items.pop_front();
        inner.items.push_back(item);

        if inner.log.is_some() {
            inner.dead_records += 1;
            if inner.dead_records >= inner.compaction_threshold {
                compact(&mut inner)?;
            }
        }
        Ok(())
    }

    /// Number of pending items
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }
}

fn append(file: &mut File, record: &Record) -> Result<(), QueueError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[derive(Debug, Default)]
struct Replayed {
    items: VecDeque<QueueItem>,
    dead_records: usize,
    torn_tail: bool,
}

/// Rebuild the in-memory state from the log
///
/// Returns the live items plus the number of dead (pop) records seen. The
/// first undecodable line ends the replay: anything after it is treated as a
/// torn tail from a crashed writer. Lines are read as raw bytes so a write
/// cut mid-way through a multi-byte character is a torn record too, not a
/// fatal io error.
fn replay(path: &Path) -> Result<Replayed, QueueError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Replayed::default());
        }
        Err(err) => return Err(err.into()),
    };

    let mut replayed = Replayed::default();
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_no = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;

        let Ok(line) = std::str::from_utf8(&buf) else {
            tracing::warn!("queue log torn record at line {line_no}, discarding tail");
            replayed.torn_tail = true;
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Record>(line) {
            Ok(Record::Push { item }) => replayed.items.push_back(item),
            Ok(Record::Pop) => {
                if replayed.items.pop_front().is_none() {
                    tracing::warn!("queue log pop with no pending item at line {line_no}");
                } else {
                    replayed.dead_records += 1;
                }
            }
            Err(err) => {
                tracing::warn!("queue log torn record at line {line_no}, discarding tail: {err}");
                replayed.torn_tail = true;
                break;
            }
        }
    }

    Ok(replayed)
}

/// Rewrite the log with only the live items
fn compact(inner: &mut Inner) -> Result<(), QueueError> {
    let Some(log) = inner.log.as_mut() else {
        return Ok(());
    };

    let tmp_path = log.path.with_extension("jsonl.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        for item in &inner.items {
            let mut line = serde_json::to_string(&Record::Push { item: item.clone() })?;
            line.push('\n');
            tmp.write_all(line.as_bytes())?;
        }
        tmp.flush()?;
    }
    fs::rename(&tmp_path, &log.path)?;

    log.file = OpenOptions::new().create(true).append(true).open(&log.path)?;
    tracing::debug!(
        "queue log compacted, {} live items remain",
        inner.items.len()
    );
    inner.dead_records = 0;
    Ok(())
}
