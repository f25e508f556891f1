use std::path::Path;

use fpc_store::StoreError;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Default compaction threshold: once pending journal records exceed 1% of
/// the live entry count, the next save rewrites the snapshot.
pub const DEFAULT_COMPACTION_RATIO: f64 = 0.01;

/// Tunables for a [`JournaledStore`](crate::JournaledStore).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// A save compacts into a new snapshot when
    /// `(journal records + dirty keys) / max(1, live entries)` exceeds this.
    pub compaction_ratio: f64,
    /// `fsync` temporary files before renaming them into place.
    pub sync_writes: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            compaction_ratio: DEFAULT_COMPACTION_RATIO,
            sync_writes: true,
        }
    }
}

impl CacheConfig {
    /// Override the compaction ratio.
    pub fn with_compaction_ratio(mut self, ratio: f64) -> Self {
        self.compaction_ratio = ratio;
        self
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> CacheResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> CacheResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the store cannot act on.
    pub fn validate(&self) -> CacheResult<()> {
        if !self.compaction_ratio.is_finite() || !(0.0..=1.0).contains(&self.compaction_ratio) {
            return Err(CacheError::Config(format!(
                "compaction_ratio must be within [0, 1], got {}",
                self.compaction_ratio
            )));
        }
        Ok(())
    }
}
