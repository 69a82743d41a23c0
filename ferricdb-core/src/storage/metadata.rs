// storage/metadata.rs
// Manifest: checkpoint position plus the collection/index catalog

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FerricError, Result};
use crate::index::IndexCatalogEntry;

use super::io;

const MANIFEST_MAGIC: &[u8; 8] = b"FERRICDB";
const MANIFEST_VERSION: u32 = 1;

/// Catalog entry for one collection: its name and index definitions.
/// Index trees are rebuilt from documents at recovery; only the specs
/// are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCatalog {
    pub name: String,
    pub indexes: Vec<IndexCatalogEntry>,
}

/// The manifest records where the last checkpoint left off and what the
/// database contains. Rewritten atomically (tmp + rename) on checkpoint
/// and on catalog changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    magic: [u8; 8],
    version: u32,
    pub checkpoint_ts: u64,
    pub collections: Vec<CollectionCatalog>,
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest {
            magic: *MANIFEST_MAGIC,
            version: MANIFEST_VERSION,
            checkpoint_ts: 0,
            collections: Vec::new(),
        }
    }
}

impl Manifest {
    pub fn new(checkpoint_ts: u64, collections: Vec<CollectionCatalog>) -> Self {
        Manifest {
            magic: *MANIFEST_MAGIC,
            version: MANIFEST_VERSION,
            checkpoint_ts,
            collections,
        }
    }

    fn path(root: &Path) -> std::path::PathBuf {
        root.join("MANIFEST")
    }

    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Manifest::default());
        }

        let data = std::fs::read(&path)?;
        let frames = io::parse_frames(&data, "MANIFEST")?;
        let [payload] = frames.as_slice() else {
            return Err(FerricError::StorageCorruption(
                "MANIFEST must contain exactly one record".into(),
            ));
        };

        let manifest: Manifest = bincode::deserialize(payload)
            .map_err(|e| FerricError::StorageCorruption(format!("undecodable MANIFEST: {}", e)))?;
        if &manifest.magic != MANIFEST_MAGIC {
            return Err(FerricError::StorageCorruption(
                "MANIFEST magic mismatch".into(),
            ));
        }
        if manifest.version != MANIFEST_VERSION {
            return Err(FerricError::StorageCorruption(format!(
                "unsupported MANIFEST version {}",
                manifest.version
            )));
        }
        Ok(manifest)
    }

    /// Write atomically: tmp file, fsync, rename over the old manifest.
    pub fn store(&self, root: &Path) -> Result<()> {
        let payload =
            bincode::serialize(self).map_err(|e| FerricError::Serialization(e.to_string()))?;

        let tmp_path = root.join("MANIFEST.tmp");
        {
            let mut tmp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            io::write_frame(&mut tmp, &payload)?;
            tmp.flush()?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, Self::path(root))?;
        Ok(())
    }
}
