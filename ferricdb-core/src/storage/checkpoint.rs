// storage/checkpoint.rs
// Flush committed state to data segments and truncate the WAL

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::document::{Document, DocumentId};
use crate::error::{FerricError, Result};

use super::{io, CollectionCatalog, Manifest, StorageEngine, VersionStore};

#[derive(Debug, Serialize, Deserialize)]
struct SegmentRecord {
    id: DocumentId,
    doc: Document,
    ts: u64,
}

pub(super) fn segment_path(root: &Path, collection: &str) -> PathBuf {
    root.join(format!("{}.seg", collection))
}

/// Load a checkpoint segment into its version store. Returns the highest
/// timestamp seen. Segments are read through a read-only memory map.
pub(super) fn load_segment(root: &Path, store: &Arc<VersionStore>) -> Result<u64> {
    let path = segment_path(root, &store.name);
    if !path.exists() {
        return Ok(0);
    }
    let file = File::open(&path)?;
    if file.metadata()?.len() == 0 {
        return Ok(0);
    }
    let mmap = unsafe { Mmap::map(&file) }?;
    let source = format!("{}.seg", store.name);
    let frames = io::parse_frames(&mmap, &source)?;

    let mut max_ts = 0;
    for payload in frames {
        let record: SegmentRecord = bincode::deserialize(payload).map_err(|e| {
            FerricError::StorageCorruption(format!("{}: undecodable record: {}", source, e))
        })?;
        max_ts = max_ts.max(record.ts);
        store.put(record.id, Arc::new(record.doc), record.ts);
    }
    Ok(max_ts)
}

impl StorageEngine {
    /// Write the latest committed version of every live document to its
    /// collection segment, record the position in the manifest, then
    /// truncate the WAL. Must run inside the commit critical section so
    /// chain heads cannot move underneath it.
    pub fn checkpoint(&self, checkpoint_ts: u64, catalog: Vec<CollectionCatalog>) -> Result<()> {
        let stores: Vec<Arc<VersionStore>> = self.stores.read().values().cloned().collect();

        for store in &stores {
            let tmp_path = self.root.join(format!("{}.seg.tmp", store.name));
            {
                let mut tmp = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&tmp_path)?;

                let chains = store.chains.read();
                for (id, chain) in chains.iter() {
                    let Some(version) = chain.visible_at(checkpoint_ts) else {
                        continue;
                    };
                    let Some(doc) = &version.doc else {
                        continue; // deleted documents need no checkpoint record
                    };
                    let record = SegmentRecord {
                        id: id.clone(),
                        doc: (**doc).clone(),
                        ts: version.ts,
                    };
                    let payload = bincode::serialize(&record)
                        .map_err(|e| FerricError::Serialization(e.to_string()))?;
                    io::write_frame(&mut tmp, &payload)?;
                }
                tmp.flush()?;
                tmp.sync_all()?;
            }
            std::fs::rename(&tmp_path, segment_path(&self.root, &store.name))?;
        }

        Manifest::new(checkpoint_ts, catalog).store(&self.root)?;
        self.wal.lock().reset()?;
        self.checkpoint_ts
            .store(checkpoint_ts, std::sync::atomic::Ordering::SeqCst);

        info!(checkpoint_ts, collections = stores.len(), "checkpoint complete");
        Ok(())
    }
}
