//! Join settings, loadable from TOML.
//!
//! ```toml
//! shard_count = 16
//! any_take_last_row = false
//! non_joined_block_rows = 65505
//!
//! [size_limits]
//! max_rows = 1000000
//! overflow_mode = "break"
//! ```

use serde::{Deserialize, Serialize};
use shardjoin_error::{JoinError, Result};

use crate::limits::SizeLimits;

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 8;
/// Default row bound for non-joined output blocks.
pub const DEFAULT_NON_JOINED_BLOCK_ROWS: usize = 65_505;

/// Settings of one concurrent hash join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JoinSettings {
    /// Number of hash-table shards. Must be at least one.
    pub shard_count: usize,
    /// For ANY strictness keep the last inserted build row per key instead of
    /// the first.
    pub any_take_last_row: bool,
    /// Upper bound on rows per non-joined output block.
    pub non_joined_block_rows: usize,
    /// Limits on the total build side across all shards.
    pub size_limits: SizeLimits,
}

impl Default for JoinSettings {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            any_take_last_row: false,
            non_joined_block_rows: DEFAULT_NON_JOINED_BLOCK_ROWS,
            size_limits: SizeLimits::default(),
        }
    }
}

impl JoinSettings {
    #[must_use]
    pub fn with_shard_count(shard_count: usize) -> Self {
        Self {
            shard_count,
            ..Self::default()
        }
    }

    /// Parse and validate settings from TOML. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// [`JoinError::InvalidConfig`] on malformed TOML or unknown fields, and
    /// any error reported by [`JoinSettings::validate`].
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|err| JoinError::config(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| JoinError::config(err.to_string()))
    }

    /// # Errors
    ///
    /// [`JoinError::InvalidShardCount`] for zero shards and
    /// [`JoinError::InvalidConfig`] for a zero block bound.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(JoinError::InvalidShardCount {
                count: self.shard_count,
            });
        }
        if self.non_joined_block_rows == 0 {
            return Err(JoinError::config("non_joined_block_rows must be positive"));
        }
        Ok(())
    }
}
