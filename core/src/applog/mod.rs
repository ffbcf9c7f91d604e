//! Durable append-only record log
//!
//! [`AppendLog`] serializes appends from many concurrent producers into a
//! single ordered byte stream. Each append is one atomic record carrying a
//! global, gap-free sequence number. Writes are crash-safe at flush
//! boundaries via `flush` + `sync_all`; on open, an existing file is
//! scanned so sequence numbering continues where the last complete record
//! left off and a torn tail from a crash is truncated away.
//!
//! ## On-disk format
//!
//! The file starts with an 8-byte header: 4 magic bytes and a u32 format
//! version. Each record is a fixed little-endian header followed by the
//! raw payload:
//!
//! ```text
//! | payload len: u32 | sequence: u64 | connection id: u64 | unix ms: u64 | payload |
//! ```
//!
//! Length prefixing keeps replay byte-exact for payloads containing any
//! delimiter byte.

use crate::{IngestError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub mod reader;

pub use reader::LogReader;

/// Magic bytes identifying an intake log file
pub const LOG_MAGIC: [u8; 4] = *b"ITKL";

/// On-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Length of the file header (magic + version)
pub const FILE_HEADER_LEN: u64 = 8;

/// Length of the fixed per-record header
pub const RECORD_HEADER_LEN: usize = 4 + 8 + 8 + 8;

/// Maximum payload size of a single record
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// One atomic unit written to the append log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Global, monotonically increasing record order key
    pub sequence: u64,
    /// Connection the payload was read from
    pub connection_id: u64,
    /// Unix timestamp in milliseconds at append time
    pub timestamp_ms: u64,
    /// Raw payload bytes, exactly as read from the connection
    pub payload: Vec<u8>,
}

struct Inner {
    /// `None` once the log has been closed
    writer: Option<BufWriter<File>>,
    next_seq: u64,
    flushes: u64,
}

/// The shared append-only log store.
///
/// All methods take `&self`; a mutex around the writer and sequence
/// counter keeps each append atomic with respect to all others. The
/// critical section only hands bytes to the buffered writer.
pub struct AppendLog {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl AppendLog {
    /// Open (or create) the log file at `path`.
    ///
    /// A fresh file gets the magic + version header. An existing file is
    /// validated and scanned: sequence numbering continues after the last
    /// complete record, and an incomplete tail record is truncated.
    ///
    /// # Errors
    /// Returns a `Storage` error if the file cannot be opened, the header
    /// does not match, or the record stream is corrupt.
    pub fn open(path: impl AsRef<Path>) -> Result<AppendLog> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| IngestError::storage(path.display(), e))?;

        let len = file
            .metadata()
            .map_err(|e| IngestError::storage(path.display(), e))?
            .len();

        let next_seq = if len == 0 {
            file.write_all(&LOG_MAGIC)
                .and_then(|_| file.write_all(&FORMAT_VERSION.to_le_bytes()))
                .and_then(|_| file.sync_all())
                .map_err(|e| IngestError::storage(path.display(), e))?;
            0
        } else {
            let (end, next_seq) = scan_existing(&path, len)?;
            if end < len {
                warn!(
                    "Truncating incomplete tail record in {} ({} bytes)",
                    path.display(),
                    len - end
                );
                file.set_len(end)
                    .map_err(|e| IngestError::storage(path.display(), e))?;
            }
            next_seq
        };

        file.seek(SeekFrom::End(0))
            .map_err(|e| IngestError::storage(path.display(), e))?;

        info!(
            "Opened append log {} (next sequence {})",
            path.display(),
            next_seq
        );

        Ok(AppendLog {
            path,
            inner: Mutex::new(Inner {
                writer: Some(BufWriter::new(file)),
                next_seq,
                flushes: 0,
            }),
        })
    }

    /// Append `bytes` as one atomic record and return its sequence number.
    ///
    /// # Errors
    /// Returns a `Storage` error if the payload exceeds [`MAX_RECORD_SIZE`],
    /// if the underlying write fails, or if the log has been closed.
    pub async fn append(&self, connection_id: u64, bytes: &[u8]) -> Result<u64> {
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(IngestError::storage(
                self.path.display(),
                format!(
                    "record of {} bytes exceeds maximum of {} bytes",
                    bytes.len(),
                    MAX_RECORD_SIZE
                ),
            ));
        }

        let mut inner = self.inner.lock().await;
        let Inner {
            writer, next_seq, ..
        } = &mut *inner;
        let writer = writer
            .as_mut()
            .ok_or_else(|| IngestError::storage(self.path.display(), "append log is closed"))?;

        let sequence = *next_seq;
        let timestamp_ms = unix_millis();

        let mut write = || -> std::io::Result<()> {
            writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
            writer.write_all(&sequence.to_le_bytes())?;
            writer.write_all(&connection_id.to_le_bytes())?;
            writer.write_all(&timestamp_ms.to_le_bytes())?;
            writer.write_all(bytes)
        };
        write().map_err(|e| IngestError::storage(self.path.display(), e))?;

        *next_seq += 1;
        Ok(sequence)
    }

    /// Force buffered data to durable storage.
    ///
    /// A no-op on a closed log (there is nothing left buffered).
    ///
    /// # Errors
    /// Returns a `Storage` error if the flush or sync fails.
    pub async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(writer) = inner.writer.as_mut() {
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_all())
                .map_err(|e| IngestError::storage(self.path.display(), e))?;
            inner.flushes += 1;
        }
        Ok(())
    }

    /// Flush and release the storage handle. Idempotent: second and later
    /// calls are no-ops returning `Ok`.
    ///
    /// # Errors
    /// Returns a `Storage` error if the final flush or sync fails.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(mut writer) = inner.writer.take() {
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_all())
                .map_err(|e| IngestError::storage(self.path.display(), e))?;
            info!(
                "Closed append log {} (next sequence {})",
                self.path.display(),
                inner.next_seq
            );
        }
        Ok(())
    }

    /// The sequence number the next append would be assigned
    pub async fn next_sequence(&self) -> u64 {
        self.inner.lock().await.next_seq
    }

    /// Number of explicit flushes performed so far
    pub async fn flush_count(&self) -> u64 {
        self.inner.lock().await.flushes
    }

    /// Whether `close()` has been called
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.writer.is_none()
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Validate the file header and locate the end of the last complete
/// record. Returns `(end_offset, next_sequence)`.
fn scan_existing(path: &Path, len: u64) -> Result<(u64, u64)> {
    let file = File::open(path).map_err(|e| IngestError::storage(path.display(), e))?;
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

    let mut offset = FILE_HEADER_LEN;
    let mut next_seq = 0u64;
    loop {
        let mut rec_header = [0u8; RECORD_HEADER_LEN];
        let mut filled = 0;
        while filled < rec_header.len() {
            let n = reader
                .read(&mut rec_header[filled..])
                .map_err(|e| IngestError::storage(path.display(), e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < rec_header.len() {
            // Clean EOF or a torn header from a crash; either way the
            // last complete record ends at `offset`.
            break;
        }

        let payload_len =
            u32::from_le_bytes([rec_header[0], rec_header[1], rec_header[2], rec_header[3]]) as u64;
        if payload_len as usize > MAX_RECORD_SIZE {
            return Err(IngestError::storage(
                path.display(),
                format!("corrupt record header at offset {}", offset),
            ));
        }
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&rec_header[4..12]);
        let sequence = u64::from_le_bytes(seq_bytes);
        if sequence != next_seq {
            return Err(IngestError::storage(
                path.display(),
                format!(
                    "sequence discontinuity at offset {}: found {}, expected {}",
                    offset, sequence, next_seq
                ),
            ));
        }

        let record_end = offset + RECORD_HEADER_LEN as u64 + payload_len;
        if record_end > len {
            // Torn payload from a crash mid-write.
            break;
        }
        reader
            .seek_relative(payload_len as i64)
            .map_err(|e| IngestError::storage(path.display(), e))?;
        offset = record_end;
        next_seq = sequence + 1;
    }

    Ok((offset, next_seq))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
