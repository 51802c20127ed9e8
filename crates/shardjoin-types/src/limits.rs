//! Row/byte size limits for the build side.

use serde::{Deserialize, Serialize};
use shardjoin_error::{JoinError, Result};
use tracing::warn;

/// What happens when a limit is crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Fail with [`JoinError::SizeLimitExceeded`].
    #[default]
    Throw,
    /// Report "stop feeding" to the caller without failing.
    Break,
}

/// Limits on stored rows and bytes. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
    pub overflow_mode: OverflowMode,
}

impl SizeLimits {
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_rows: 0,
            max_bytes: 0,
            overflow_mode: OverflowMode::Throw,
        }
    }

    #[must_use]
    pub const fn has_limits(&self) -> bool {
        self.max_rows != 0 || self.max_bytes != 0
    }

    #[must_use]
    pub const fn exceeded(&self, rows: usize, bytes: usize) -> bool {
        (self.max_rows != 0 && rows > self.max_rows)
            || (self.max_bytes != 0 && bytes > self.max_bytes)
    }

    /// Check current totals.
    ///
    /// Returns `Ok(true)` within limits and `Ok(false)` when a limit is
    /// crossed under [`OverflowMode::Break`].
    ///
    /// # Errors
    ///
    /// [`JoinError::SizeLimitExceeded`] when a limit is crossed under
    /// [`OverflowMode::Throw`].
    pub fn check(&self, rows: usize, bytes: usize, operator: &'static str) -> Result<bool> {
        if !self.exceeded(rows, bytes) {
            return Ok(true);
        }
        match self.overflow_mode {
            OverflowMode::Throw => Err(JoinError::SizeLimitExceeded {
                operator,
                rows,
                bytes,
                max_rows: self.max_rows,
                max_bytes: self.max_bytes,
            }),
            OverflowMode::Break => {
                warn!(
                    operator,
                    rows,
                    bytes,
                    max_rows = self.max_rows,
                    max_bytes = self.max_bytes,
                    "size limit reached, stop reading build side"
                );
                Ok(false)
            }
        }
    }
}
