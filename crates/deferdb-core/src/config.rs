//! Engine configuration.

use std::path::PathBuf;

/// Default number of hinted keys the deferred ledger keeps in memory.
pub const DEFAULT_LEDGER_SPILL_THRESHOLD: usize = 64 * 1024;

/// Default nesting limit for cascading referential actions.
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 100;

/// Settings for constraint enforcement.
#[derive(Debug, Clone)]
pub struct ConstraintConfig {
    /// Hinted keys held in memory before the ledger spills to a temporary tree.
    pub ledger_spill_threshold: usize,

    /// Maximum nesting of CASCADE / SET NULL actions.
    pub max_cascade_depth: usize,
}

impl Default for ConstraintConfig {
    fn default() -> Self {
        Self {
            ledger_spill_threshold: DEFAULT_LEDGER_SPILL_THRESHOLD,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}

impl ConstraintConfig {
    /// Set the ledger spill threshold.
    pub fn with_ledger_spill_threshold(mut self, threshold: usize) -> Self {
        self.ledger_spill_threshold = threshold;
        self
    }

    /// Set the cascade depth limit.
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }
}

/// Configuration for the storage engine and constraint layer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None means flush on every write.
    pub flush_every_ms: Option<u64>,

    /// Enable zstd compression.
    pub compression: bool,

    /// Temporary database (deleted on drop).
    pub temporary: bool,

    /// Constraint enforcement settings.
    pub constraints: ConstraintConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./deferdb_data"),
            cache_capacity: 256 * 1024 * 1024,
            flush_every_ms: Some(1000),
            compression: true,
            temporary: false,
            constraints: ConstraintConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the constraint settings.
    pub fn with_constraints(mut self, constraints: ConstraintConfig) -> Self {
        self.constraints = constraints;
        self
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable compression.
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        if let Some(ms) = self.flush_every_ms {
            config = config.flush_every_ms(Some(ms));
        }

        config
    }
}
