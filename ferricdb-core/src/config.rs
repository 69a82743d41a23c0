// src/config.rs
// Engine configuration knobs

use std::time::Duration;

/// How aggressively the write-ahead log is flushed to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityPolicy {
    /// fsync after every commit. Slowest, loses nothing.
    Always,
    /// fsync every `every_n` commits (and on checkpoint/close).
    /// A crash may lose the tail of un-synced commits.
    Batched { every_n: u32 },
}

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WAL flush policy.
    pub durability: DurabilityPolicy,

    /// Checkpoint once the WAL grows past this many bytes.
    pub checkpoint_log_bytes: u64,

    /// Memory ceiling for materializing $group / $sort stages.
    pub aggregation_memory_limit: usize,

    /// Default deadline applied to operations that don't set one.
    pub default_deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            durability: DurabilityPolicy::Always,
            checkpoint_log_bytes: 64 * 1024 * 1024,
            aggregation_memory_limit: 100 * 1024 * 1024,
            default_deadline: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_durability(mut self, durability: DurabilityPolicy) -> Self {
        self.durability = durability;
        self
    }

    pub fn with_checkpoint_log_bytes(mut self, bytes: u64) -> Self {
        self.checkpoint_log_bytes = bytes;
        self
    }

    pub fn with_aggregation_memory_limit(mut self, bytes: usize) -> Self {
        self.aggregation_memory_limit = bytes;
        self
    }

    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }
}
