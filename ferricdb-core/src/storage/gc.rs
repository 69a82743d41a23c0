// storage/gc.rs
// Version-chain garbage collection

use tracing::debug;

use super::StorageEngine;

/// Outcome of one garbage collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub examined_chains: usize,
    pub reclaimed_versions: usize,
    pub removed_chains: usize,
}

impl StorageEngine {
    /// Reclaim versions no open snapshot can observe. A version is
    /// eligible once its timestamp is older than the oldest active
    /// snapshot and a newer version exists; a chain reduced to a single
    /// stale tombstone is dropped entirely.
    pub fn collect_garbage(&self, oldest_active: u64) -> GcStats {
        let mut stats = GcStats::default();
        let stores: Vec<_> = self.stores.read().values().cloned().collect();

        for store in stores {
            store.with_chains(|chains| {
                chains.retain(|_, chain| {
                    stats.examined_chains += 1;
                    let (reclaimed, removable) = chain.prune(oldest_active);
                    stats.reclaimed_versions += reclaimed;
                    if removable {
                        stats.reclaimed_versions += chain.len();
                        stats.removed_chains += 1;
                        return false;
                    }
                    true
                });
            });
        }

        if stats.reclaimed_versions > 0 {
            debug!(
                oldest_active,
                reclaimed = stats.reclaimed_versions,
                removed_chains = stats.removed_chains,
                "garbage collected"
            );
        }
        stats
    }
}
