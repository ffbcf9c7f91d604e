//! Sequential replay of an intake log file
//!
//! [`LogReader`] is the read-only counterpart of
//! [`AppendLog`](super::AppendLog): it validates the file header and
//! yields records in sequence order. Replaying the records of one
//! connection in order reproduces that connection's input stream
//! byte-exactly.
//!
//! Corruption is surfaced as errors rather than skipped so callers can
//! decide how to recover; a torn tail record reads as an error after the
//! last complete record.

use super::{LogRecord, FILE_HEADER_LEN, FORMAT_VERSION, LOG_MAGIC, MAX_RECORD_SIZE, RECORD_HEADER_LEN};
use crate::{IngestError, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Read-only iterator over the records of an append log file
pub struct LogReader {
    path: PathBuf,
    reader: BufReader<File>,
}

impl LogReader {
    /// Open a log file for replay, validating its magic and version.
    ///
    /// # Errors
    /// Returns a `Storage` error if the file cannot be opened or is not
    /// an intake log of the supported version.
    pub fn open(path: impl AsRef<Path>) -> Result<LogReader> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| IngestError::storage(path.display(), e))?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; FILE_HEADER_LEN as usize];
        reader
            .read_exact(&mut header)
            .map_err(|_| IngestError::storage(path.display(), "file too short for log header"))?;
        if header[..4] != LOG_MAGIC {
            return Err(IngestError::storage(path.display(), "not an intake log file"));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != FORMAT_VERSION {
            return Err(IngestError::storage(
                path.display(),
                format!(
                    "unsupported log format version {} (expected {})",
                    version, FORMAT_VERSION
                ),
            ));
        }

        Ok(LogReader { path, reader })
    }

    /// Read the next record, or `Ok(None)` at a clean end of file.
    ///
    /// # Errors
    /// Returns a `Storage` error on a truncated or corrupt record.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < header.len() {
            let n = self
                .reader
                .read(&mut header[filled..])
                .map_err(|e| IngestError::storage(self.path.display(), e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < header.len() {
            return Err(IngestError::storage(
                self.path.display(),
                "truncated record header",
            ));
        }

        let payload_len =
            u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if payload_len > MAX_RECORD_SIZE {
            return Err(IngestError::storage(
                self.path.display(),
                "corrupt record header",
            ));
        }
        let mut field = [0u8; 8];
        field.copy_from_slice(&header[4..12]);
        let sequence = u64::from_le_bytes(field);
        field.copy_from_slice(&header[12..20]);
        let connection_id = u64::from_le_bytes(field);
        field.copy_from_slice(&header[20..28]);
        let timestamp_ms = u64::from_le_bytes(field);

        let mut payload = vec![0u8; payload_len];
        self.reader
            .read_exact(&mut payload)
            .map_err(|_| IngestError::storage(self.path.display(), "truncated record payload"))?;

        Ok(Some(LogRecord {
            sequence,
            connection_id,
            timestamp_ms,
            payload,
        }))
    }

    /// Read every record of the file at `path` into memory.
    ///
    /// Convenience for tests and small logs; large logs should iterate
    /// with [`next_record`](Self::next_record).
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
        let mut reader = LogReader::open(path)?;
        let mut records = Vec::new();
        while let Some(record) = reader.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}
