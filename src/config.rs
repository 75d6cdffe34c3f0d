//! Configuration for the cache engine.

use std::num::NonZeroUsize;

/// Fragmentation ratio above which `close` rewrites the blob.
pub const DEFAULT_AUTO_VACUUM_THRESHOLD: f64 = 0.5;

/// Tunable parameters for the cache engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Fragmentation ratio in `[0, 1]` above which close runs a vacuum;
    /// 1.0 disables the gate.
    pub auto_vacuum_threshold: f64,
    /// Maximum number of decoded values kept in memory.
    /// When absent, the read cache is disabled.
    pub cache_capacity: Option<NonZeroUsize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_vacuum_threshold: DEFAULT_AUTO_VACUUM_THRESHOLD,
            cache_capacity: None,
        }
    }
}
