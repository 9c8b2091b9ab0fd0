//! Write-Ahead Log for durability
//!
//! Every committed transaction becomes one [`CommitBatch`]. The file format
//! is an 8-byte magic followed by frames:
//!
//! ```text
//! len: u32 LE | crc32(body): u32 LE | flags: u8 | body: [u8; len]
//! ```
//!
//! `body` is the bincode-encoded batch, zstd-compressed when
//! [`FLAG_COMPRESSED`] is set.

use crate::config::WalConfig;
use crate::core::record::{HistoryRecord, Payload, RowId};
use crate::core::temporal::Timestamp;
use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic number at the start of every log file
pub const MAGIC: &[u8; 8] = b"BTWAL001";

/// Frame header size: length + checksum + flags
pub const FRAME_HEADER_SIZE: usize = 9;

/// Compression level for ZSTD (1-22, higher = better compression but slower)
pub const ZSTD_COMPRESSION_LEVEL: i32 = 3;

/// Frame body is compressed with ZSTD
pub const FLAG_COMPRESSED: u8 = 0x01;

/// Everything one transaction published
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitBatch<P> {
    /// New rows, in insertion order
    pub appended: Vec<HistoryRecord<P>>,
    /// Rows whose transaction time was closed, and when
    pub closed: Vec<(RowId, Timestamp)>,
}

impl<P> CommitBatch<P> {
    pub fn is_empty(&self) -> bool {
        self.appended.is_empty() && self.closed.is_empty()
    }
}

/// Write-Ahead Log trait
pub trait WriteAheadLog<P>: Send + Sync {
    /// Durably record a batch before it is published
    fn append(&mut self, batch: &CommitBatch<P>) -> Result<()>;

    /// Flush WAL to disk
    fn flush(&mut self) -> Result<()>;

    /// Replay every batch recorded so far, oldest first
    fn replay(&mut self) -> Result<Vec<CommitBatch<P>>>;
}

/// In-memory WAL (volatile stores and tests)
pub struct InMemoryWal<P> {
    batches: Vec<CommitBatch<P>>,
}

impl<P> InMemoryWal<P> {
    pub fn new() -> Self {
        Self {
            batches: Vec::new(),
        }
    }
}

impl<P> Default for InMemoryWal<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Payload> WriteAheadLog<P> for InMemoryWal<P> {
    fn append(&mut self, batch: &CommitBatch<P>) -> Result<()> {
        self.batches.push(batch.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn replay(&mut self) -> Result<Vec<CommitBatch<P>>> {
        Ok(self.batches.clone())
    }
}

/// Single-file WAL
pub struct FileWal {
    file: File,
    path: PathBuf,
    /// Length of the file up to the end of the last complete frame
    len: u64,
    sync_on_commit: bool,
    compress: bool,
}

impl FileWal {
    /// Open (or create) the log at `path`
    pub fn open<Q: AsRef<Path>>(path: Q, config: &WalConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut len = file.metadata()?.len();
        if len == 0 {
            file.write_all(MAGIC)?;
            file.sync_all()?;
            len = MAGIC.len() as u64;
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            sync_on_commit: config.sync_on_commit,
            compress: config.compress,
        })
    }

    fn encode<P: Serialize>(&self, batch: &CommitBatch<P>) -> Result<BytesMut> {
        let mut body = bincode::serialize(batch)?;
        let mut flags = 0u8;
        if self.compress {
            body = zstd::encode_all(&body[..], ZSTD_COMPRESSION_LEVEL)
                .map_err(|e| Error::Storage(format!("ZSTD compression failed: {}", e)))?;
            flags |= FLAG_COMPRESSED;
        }

        let mut hasher = Crc32Hasher::new();
        hasher.update(&body);

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
        frame.put_u32_le(body.len() as u32);
        frame.put_u32_le(hasher.finalize());
        frame.put_u8(flags);
        frame.put_slice(&body);
        Ok(frame)
    }
}

/// Decode one frame body, verifying its checksum
fn decode_body<P: Payload>(body: &[u8], checksum: u32, flags: u8) -> Result<CommitBatch<P>> {
    let mut hasher = Crc32Hasher::new();
    hasher.update(body);
    let calculated = hasher.finalize();
    if calculated != checksum {
        return Err(Error::Storage(format!(
            "Checksum mismatch: expected {}, got {}",
            checksum, calculated
        )));
    }

    if flags & FLAG_COMPRESSED != 0 {
        let decompressed = zstd::decode_all(body)
            .map_err(|e| Error::Storage(format!("ZSTD decompression failed: {}", e)))?;
        Ok(bincode::deserialize(&decompressed)?)
    } else {
        Ok(bincode::deserialize(body)?)
    }
}

impl<P: Payload> WriteAheadLog<P> for FileWal {
    fn append(&mut self, batch: &CommitBatch<P>) -> Result<()> {
        let frame = self.encode(batch)?;

        let written = self
            .file
            .seek(SeekFrom::Start(self.len))
            .and_then(|_| self.file.write_all(&frame))
            .and_then(|_| {
                if self.sync_on_commit {
                    self.file.sync_data()
                } else {
                    Ok(())
                }
            });

        if let Err(e) = written {
            // Cut any torn frame so later commits stay readable.
            if let Err(trunc) = self.file.set_len(self.len) {
                warn!(path = %self.path.display(), error = %trunc, "failed to truncate torn WAL frame");
            }
            return Err(Error::Storage(format!("WAL append failed: {}", e)));
        }

        self.len += frame.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn replay(&mut self) -> Result<Vec<CommitBatch<P>>> {
        let mut reader = File::open(&self.path)?;
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;

        if raw.len() < MAGIC.len() || &raw[..MAGIC.len()] != MAGIC {
            return Err(Error::Storage(format!(
                "{} is not a history log (bad magic)",
                self.path.display()
            )));
        }

        let mut buf = &raw[MAGIC.len()..];
        let mut good_len = MAGIC.len() as u64;
        let mut batches = Vec::new();

        while buf.has_remaining() {
            if buf.remaining() < FRAME_HEADER_SIZE {
                break;
            }
            let mut header = &buf[..FRAME_HEADER_SIZE];
            let body_len = header.get_u32_le() as usize;
            let checksum = header.get_u32_le();
            let flags = header.get_u8();
            if buf.remaining() < FRAME_HEADER_SIZE + body_len {
                break;
            }
            buf.advance(FRAME_HEADER_SIZE);
            batches.push(decode_body(&buf[..body_len], checksum, flags)?);
            buf.advance(body_len);
            good_len += (FRAME_HEADER_SIZE + body_len) as u64;
        }

        if good_len < raw.len() as u64 {
            warn!(
                path = %self.path.display(),
                dropped = raw.len() as u64 - good_len,
                "truncating torn frame at end of WAL"
            );
            self.file.set_len(good_len)?;
            self.file.sync_all()?;
        }
        self.len = good_len;

        debug!(path = %self.path.display(), batches = batches.len(), "replayed WAL");
        Ok(batches)
    }
}
