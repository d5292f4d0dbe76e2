//! # Append-Only WAL File
//!
//! The write-ahead log lives beside the data file (extension `.wal`) as a
//! flat sequence of length-prefixed records. Appends assign the monotonic
//! sequence number; commit durability comes from an explicit [`WalLog::flush`]
//! (fsync), which the transaction layer issues *before* reporting a commit.
//!
//! ## Open Scan
//!
//! Opening the log walks every frame to recover the sequence cursor (the
//! maximum sequence observed) and the last checkpoint. The scan stops
//! cleanly at the first sign of a torn tail (a short length header, a body
//! shorter than declared, an implausible length, or a checksum mismatch)
//! and the file is truncated back to the last good frame so the next append
//! overwrites the garbage. Framing corruption is logged, not fatal: it is
//! the expected shape of a crash mid-append.
//!
//! ## Truncation Policy
//!
//! `truncate_after_checkpoint` refuses. The index this engine journals for
//! is rebuilt from the WAL on every open (tree state is not persisted to
//! data pages), so dropping records at a checkpoint would drop committed
//! rows. `clear` exists for callers that have externally arranged a full
//! reset.
//!
//! ## Locking
//!
//! One reader/writer lock: appends, checkpoints, and truncation take it
//! exclusively; scans take it shared and read through an independent file
//! handle, so concurrent scans never contend on a shared cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::record::{OpKind, WalRecord};
use crate::config::{MAX_WAL_RECORD_SIZE, WAL_FILE_EXTENSION, WAL_FRAME_LEN_SIZE};

#[derive(Debug)]
struct WalInner {
    file: File,
    /// Byte offset just past the last valid frame.
    write_offset: u64,
    /// Last assigned sequence number; 0 before any append.
    sequence: u64,
    last_checkpoint: Option<u64>,
}

#[derive(Debug)]
pub struct WalLog {
    path: PathBuf,
    inner: RwLock<WalInner>,
}

impl WalLog {
    /// The WAL path for a given data file path: extension replaced by
    /// `.wal`.
    pub fn path_for(data_path: &Path) -> PathBuf {
        let mut path = data_path.to_path_buf();
        path.set_extension(WAL_FILE_EXTENSION);
        path
    }

    /// Opens or creates the log at `path` and scans it to position the
    /// sequence cursor after the last valid record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to open WAL file '{}'", path.display()))?;

        let file_len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat WAL file '{}'", path.display()))?
            .len();

        let scan = scan_frames(&mut file, file_len, &path)?;

        if scan.good_offset < file_len {
            warn!(
                path = %path.display(),
                discarded = file_len - scan.good_offset,
                "discarding torn WAL tail"
            );
            file.set_len(scan.good_offset)
                .wrap_err("failed to truncate torn WAL tail")?;
        }

        debug!(
            path = %path.display(),
            records = scan.records,
            sequence = scan.max_sequence,
            "opened WAL"
        );

        Ok(Self {
            path,
            inner: RwLock::new(WalInner {
                file,
                write_offset: scan.good_offset,
                sequence: scan.max_sequence,
                last_checkpoint: scan.last_checkpoint,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last assigned sequence number.
    pub fn sequence(&self) -> u64 {
        self.inner.read().sequence
    }

    /// Sequence of the most recent checkpoint record, if any.
    pub fn last_checkpoint(&self) -> Option<u64> {
        self.inner.read().last_checkpoint
    }

    /// Appends `record`, assigning and returning its sequence number. The
    /// frame reaches the OS before this returns; call [`flush`](Self::flush)
    /// for durability.
    pub fn append(&self, record: &mut WalRecord) -> Result<u64> {
        let mut inner = self.inner.write();

        let sequence = inner.sequence + 1;
        record.sequence = sequence;

        let body = record.serialize();
        let mut frame = Vec::with_capacity(WAL_FRAME_LEN_SIZE + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);

        let offset = inner.write_offset;
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .wrap_err("failed to seek to WAL append position")?;
        inner
            .file
            .write_all(&frame)
            .wrap_err("failed to append WAL record")?;
        inner
            .file
            .flush()
            .wrap_err("failed to flush WAL userspace buffers")?;

        inner.write_offset += frame.len() as u64;
        inner.sequence = sequence;
        if record.op == OpKind::Checkpoint {
            inner.last_checkpoint = Some(sequence);
        }

        Ok(sequence)
    }

    /// Durability barrier: fsyncs everything appended so far.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read();
        inner
            .file
            .sync_data()
            .wrap_err("failed to fsync WAL file")
    }

    /// Full linear scan of every valid record.
    pub fn read_all(&self) -> Result<Vec<WalRecord>> {
        let inner = self.inner.read();

        // Independent handle: shared-lock scans must not disturb (or race
        // on) the appender's file cursor.
        let mut file = File::open(&self.path)
            .wrap_err_with(|| format!("failed to reopen WAL file '{}'", self.path.display()))?;

        let mut records = Vec::new();
        let mut offset = 0u64;
        while offset < inner.write_offset {
            let (record, next) = read_frame_at(&mut file, offset, inner.write_offset)?;
            records.push(record);
            offset = next;
        }
        Ok(records)
    }

    /// Records with a sequence strictly greater than `sequence`.
    pub fn read_after(&self, sequence: u64) -> Result<Vec<WalRecord>> {
        let mut records = self.read_all()?;
        records.retain(|r| r.sequence > sequence);
        Ok(records)
    }

    /// Appends a checkpoint marker and returns its sequence.
    pub fn checkpoint(&self) -> Result<u64> {
        let mut record = WalRecord::marker(0, OpKind::Checkpoint);
        let sequence = self.append(&mut record)?;
        self.flush()?;
        Ok(sequence)
    }

    /// Refused: the in-memory index is rebuilt from this log on every open,
    /// so records before a checkpoint are still the only durable copy of
    /// committed rows.
    pub fn truncate_after_checkpoint(&self) -> Result<()> {
        ensure!(
            self.last_checkpoint().is_some(),
            "no checkpoint to truncate after"
        );
        bail!(
            "refusing to truncate WAL: row data is not persisted to data pages, \
             records before the checkpoint are still required for recovery"
        )
    }

    /// Truncates the log to zero and resets the sequence cursor.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .file
            .set_len(0)
            .wrap_err("failed to truncate WAL file")?;
        inner
            .file
            .sync_data()
            .wrap_err("failed to sync WAL after clear")?;
        inner.write_offset = 0;
        inner.sequence = 0;
        inner.last_checkpoint = None;
        Ok(())
    }
}

struct ScanResult {
    good_offset: u64,
    max_sequence: u64,
    last_checkpoint: Option<u64>,
    records: usize,
}

/// Walks frames from the start of the file, stopping cleanly at the first
/// torn or corrupt frame.
fn scan_frames(file: &mut File, file_len: u64, path: &Path) -> Result<ScanResult> {
    let mut offset = 0u64;
    let mut max_sequence = 0u64;
    let mut last_checkpoint = None;
    let mut records = 0usize;

    file.seek(SeekFrom::Start(0))
        .wrap_err("failed to seek to WAL start")?;

    loop {
        if offset + WAL_FRAME_LEN_SIZE as u64 > file_len {
            break;
        }

        let mut len_bytes = [0u8; WAL_FRAME_LEN_SIZE];
        file.read_exact(&mut len_bytes)
            .wrap_err("failed to read WAL frame length")?;
        let body_len = u32::from_le_bytes(len_bytes);

        if body_len == 0 || body_len > MAX_WAL_RECORD_SIZE {
            warn!(
                path = %path.display(),
                offset,
                body_len,
                "implausible WAL frame length, treating as torn tail"
            );
            break;
        }

        if offset + WAL_FRAME_LEN_SIZE as u64 + body_len as u64 > file_len {
            warn!(
                path = %path.display(),
                offset,
                "WAL frame body extends past EOF, treating as torn tail"
            );
            break;
        }

        let mut body = vec![0u8; body_len as usize];
        file.read_exact(&mut body)
            .wrap_err("failed to read WAL frame body")?;

        let record = match WalRecord::deserialize(&body) {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    path = %path.display(),
                    offset,
                    %error,
                    "corrupt WAL frame, treating as torn tail"
                );
                break;
            }
        };

        max_sequence = max_sequence.max(record.sequence);
        if record.op == OpKind::Checkpoint {
            last_checkpoint = Some(record.sequence);
        }
        records += 1;
        offset += WAL_FRAME_LEN_SIZE as u64 + body_len as u64;
    }

    Ok(ScanResult {
        good_offset: offset,
        max_sequence,
        last_checkpoint,
        records,
    })
}

/// Reads the frame at `offset`, returning the record and the next offset.
/// Only called for offsets below the validated write offset.
fn read_frame_at(file: &mut File, offset: u64, limit: u64) -> Result<(WalRecord, u64)> {
    file.seek(SeekFrom::Start(offset))
        .wrap_err("failed to seek to WAL frame")?;

    let mut len_bytes = [0u8; WAL_FRAME_LEN_SIZE];
    file.read_exact(&mut len_bytes)
        .wrap_err("failed to read WAL frame length")?;
    let body_len = u32::from_le_bytes(len_bytes) as u64;

    ensure!(
        offset + WAL_FRAME_LEN_SIZE as u64 + body_len <= limit,
        "WAL frame at offset {} extends past the validated region",
        offset
    );

    let mut body = vec![0u8; body_len as usize];
    file.read_exact(&mut body)
        .wrap_err("failed to read WAL frame body")?;

    let record = WalRecord::deserialize(&body)?;
    Ok((record, offset + WAL_FRAME_LEN_SIZE as u64 + body_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::tempdir;

    fn mutation(txn: i64, key: i64) -> WalRecord {
        WalRecord::mutation(
            txn,
            OpKind::Insert,
            "t",
            Value::I64(key),
            None,
            Some(format!("row-{}", key).into_bytes()),
        )
    }

    #[test]
    fn path_for_replaces_extension() {
        assert_eq!(
            WalLog::path_for(Path::new("/tmp/db.mde")),
            PathBuf::from("/tmp/db.wal")
        );
    }

    #[test]
    fn append_assigns_monotonic_sequences() {
        let dir = tempdir().unwrap();
        let log = WalLog::open(dir.path().join("test.wal")).unwrap();

        for expected in 1..=5u64 {
            let mut record = mutation(1, expected as i64);
            assert_eq!(log.append(&mut record).unwrap(), expected);
            assert_eq!(record.sequence, expected);
        }
        assert_eq!(log.sequence(), 5);
    }

    #[test]
    fn read_all_returns_records_in_append_order() {
        let dir = tempdir().unwrap();
        let log = WalLog::open(dir.path().join("test.wal")).unwrap();

        log.append(&mut WalRecord::marker(1, OpKind::Begin)).unwrap();
        log.append(&mut mutation(1, 10)).unwrap();
        log.append(&mut WalRecord::marker(1, OpKind::Commit)).unwrap();
        log.flush().unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].op, OpKind::Begin);
        assert_eq!(records[1].op, OpKind::Insert);
        assert_eq!(records[1].key, Some(Value::I64(10)));
        assert_eq!(records[2].op, OpKind::Commit);
        assert_eq!(
            records.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn read_after_filters_by_sequence() {
        let dir = tempdir().unwrap();
        let log = WalLog::open(dir.path().join("test.wal")).unwrap();

        for i in 1..=6 {
            log.append(&mut mutation(1, i)).unwrap();
        }

        let tail = log.read_after(4).unwrap();
        assert_eq!(
            tail.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![5, 6]
        );
    }

    #[test]
    fn sequence_cursor_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let log = WalLog::open(&path).unwrap();
            for i in 1..=4 {
                log.append(&mut mutation(1, i)).unwrap();
            }
            log.flush().unwrap();
        }

        let log = WalLog::open(&path).unwrap();
        assert_eq!(log.sequence(), 4);
        assert_eq!(log.append(&mut mutation(2, 99)).unwrap(), 5);
    }

    #[test]
    fn torn_length_header_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let log = WalLog::open(&path).unwrap();
            log.append(&mut mutation(1, 1)).unwrap();
            log.flush().unwrap();
        }

        // A length header with no body: the torn shape of a crashed append.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x40, 0, 0]).unwrap();
        }

        let log = WalLog::open(&path).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
        assert_eq!(log.sequence(), 1);

        // The tail was truncated; the next append lands cleanly.
        log.append(&mut mutation(2, 2)).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 2);
    }

    #[test]
    fn short_body_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let log = WalLog::open(&path).unwrap();
            log.append(&mut mutation(1, 1)).unwrap();
        }

        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            // Declares 100 bytes, delivers 3.
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let log = WalLog::open(&path).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_body_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        let good_len = {
            let log = WalLog::open(&path).unwrap();
            log.append(&mut mutation(1, 1)).unwrap();
            log.append(&mut mutation(1, 2)).unwrap();
            log.flush().unwrap();
            std::fs::metadata(&path).unwrap().len()
        };

        // Flip a byte inside the second record's body.
        {
            use std::os::unix::fs::FileExt;
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.write_all_at(&[0xFF], good_len - 10).unwrap();
        }

        let log = WalLog::open(&path).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, Some(Value::I64(1)));
    }

    #[test]
    fn checkpoint_is_remembered_and_truncation_refuses() {
        let dir = tempdir().unwrap();
        let log = WalLog::open(dir.path().join("test.wal")).unwrap();

        assert!(log.truncate_after_checkpoint().is_err());

        log.append(&mut mutation(1, 1)).unwrap();
        let seq = log.checkpoint().unwrap();
        assert_eq!(log.last_checkpoint(), Some(seq));

        let result = log.truncate_after_checkpoint();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("refusing to truncate"));

        // Nothing was dropped.
        assert_eq!(log.read_all().unwrap().len(), 2);
    }

    #[test]
    fn checkpoint_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        let seq = {
            let log = WalLog::open(&path).unwrap();
            log.append(&mut mutation(1, 1)).unwrap();
            log.checkpoint().unwrap()
        };

        let log = WalLog::open(&path).unwrap();
        assert_eq!(log.last_checkpoint(), Some(seq));
    }

    #[test]
    fn clear_resets_the_cursor() {
        let dir = tempdir().unwrap();
        let log = WalLog::open(dir.path().join("test.wal")).unwrap();

        log.append(&mut mutation(1, 1)).unwrap();
        log.clear().unwrap();

        assert_eq!(log.sequence(), 0);
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.append(&mut mutation(2, 2)).unwrap(), 1);
    }
}
