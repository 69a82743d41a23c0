// src/wal.rs
// Append-only write-ahead log with checksummed frames

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::{Document, DocumentId};
use crate::error::{FerricError, Result};

pub type TxId = u64;

/// One logical WAL record. A transaction appears as Begin, a run of
/// Put/Delete, then Commit (with its timestamp) or Abort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalRecord {
    Begin {
        tx: TxId,
    },
    Put {
        tx: TxId,
        collection: String,
        id: DocumentId,
        doc: Document,
    },
    Delete {
        tx: TxId,
        collection: String,
        id: DocumentId,
    },
    Commit {
        tx: TxId,
        ts: u64,
    },
    Abort {
        tx: TxId,
    },
}

impl WalRecord {
    pub fn tx(&self) -> TxId {
        match self {
            WalRecord::Begin { tx }
            | WalRecord::Put { tx, .. }
            | WalRecord::Delete { tx, .. }
            | WalRecord::Commit { tx, .. }
            | WalRecord::Abort { tx } => *tx,
        }
    }
}

/// A replayable operation recovered from the log.
#[derive(Debug, Clone)]
pub enum RecoveredOp {
    Put {
        collection: String,
        id: DocumentId,
        doc: Document,
    },
    Delete {
        collection: String,
        id: DocumentId,
    },
}

/// A committed transaction reconstructed at recovery.
#[derive(Debug)]
pub struct CommittedTx {
    pub ts: u64,
    pub ops: Vec<RecoveredOp>,
}

/// Frame layout: [len: u32 LE][payload: bincode][crc32(payload): u32 LE].
pub struct WriteAheadLog {
    file: File,
    path: PathBuf,
}

impl WriteAheadLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(WriteAheadLog { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record. Durability requires a subsequent `sync()`.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        let payload =
            bincode::serialize(record).map_err(|e| FerricError::Serialization(e.to_string()))?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc.to_le_bytes());
        self.file.write_all(&frame)?;
        Ok(())
    }

    /// fsync the log. Called per the configured durability policy.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Replay the log, returning committed transactions ordered by commit
    /// timestamp. A torn final frame (crash mid-append) ends the replay;
    /// a checksum mismatch inside the log is corruption and halts startup.
    pub fn replay(&mut self) -> Result<Vec<CommittedTx>> {
        self.file.seek(SeekFrom::Start(0))?;
        let total = self.file.metadata()?.len();

        let mut records = Vec::new();
        let mut offset: u64 = 0;
        loop {
            match self.read_frame(offset, total)? {
                Some((record, next)) => {
                    records.push(record);
                    offset = next;
                }
                None => break,
            }
        }

        // Group ops by transaction, keep those with a Commit marker.
        use std::collections::HashMap;
        let mut ops_by_tx: HashMap<TxId, Vec<RecoveredOp>> = HashMap::new();
        let mut committed: Vec<CommittedTx> = Vec::new();

        for record in records {
            match record {
                WalRecord::Begin { tx } => {
                    ops_by_tx.entry(tx).or_default();
                }
                WalRecord::Put {
                    tx,
                    collection,
                    id,
                    doc,
                } => {
                    ops_by_tx.entry(tx).or_default().push(RecoveredOp::Put {
                        collection,
                        id,
                        doc,
                    });
                }
                WalRecord::Delete { tx, collection, id } => {
                    ops_by_tx
                        .entry(tx)
                        .or_default()
                        .push(RecoveredOp::Delete { collection, id });
                }
                WalRecord::Commit { tx, ts } => {
                    if let Some(ops) = ops_by_tx.remove(&tx) {
                        committed.push(CommittedTx { ts, ops });
                    }
                }
                WalRecord::Abort { tx } => {
                    ops_by_tx.remove(&tx);
                }
            }
        }
        // Transactions without a Commit marker are discarded.

        committed.sort_by_key(|tx| tx.ts);
        Ok(committed)
    }

    /// Read the frame at `offset`. Returns None at end of log or on a torn
    /// tail frame; checksum failure is corruption.
    fn read_frame(&mut self, offset: u64, total: u64) -> Result<Option<(WalRecord, u64)>> {
        if offset + 4 > total {
            if offset < total {
                warn!(offset, total, "torn frame header at log tail, discarding");
            }
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut len_bytes = [0u8; 4];
        self.file.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as u64;

        if offset + 4 + len + 4 > total {
            warn!(offset, total, "torn frame body at log tail, discarding");
            return Ok(None);
        }

        let mut payload = vec![0u8; len as usize];
        self.file.read_exact(&mut payload)?;
        let mut crc_bytes = [0u8; 4];
        self.file.read_exact(&mut crc_bytes)?;
        let stored_crc = u32::from_le_bytes(crc_bytes);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Err(FerricError::StorageCorruption(format!(
                "WAL checksum mismatch at offset {}",
                offset
            )));
        }

        let record: WalRecord = bincode::deserialize(&payload).map_err(|e| {
            FerricError::StorageCorruption(format!("undecodable WAL record at {}: {}", offset, e))
        })?;
        Ok(Some((record, offset + 4 + len + 4)))
    }

    /// Truncate the log after a checkpoint has captured its contents.
    pub fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        Ok(())
    }
}
