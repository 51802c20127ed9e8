//! Error types shared by every `shardjoin` crate.
//!
//! Errors fall into three families:
//!
//! - configuration errors, raised while a join is being constructed
//!   (`InvalidShardCount`, `KeyArityMismatch`, `UnknownColumn`,
//!   `KeyTypeMismatch`, `Unsupported`, `InvalidConfig`);
//! - `SizeLimitExceeded`, raised only when a caller opts into limit checks;
//! - `Internal`, a violated invariant upstream (planner or engine bug).
//!
//! None of them are retried internally.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T, E = JoinError> = std::result::Result<T, E>;

/// Every failure a sharded join can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// A join was requested with zero shards.
    #[error("invalid shard count: {count}")]
    InvalidShardCount { count: usize },

    /// Build and probe key lists have different lengths.
    #[error("join key arity mismatch: build side has {build} keys, probe side has {probe}")]
    KeyArityMismatch { build: usize, probe: usize },

    /// A key (or other referenced) column is absent from a schema.
    #[error("unknown column `{name}` in {side} schema")]
    UnknownColumn { name: String, side: &'static str },

    /// Key columns on the two sides cannot be compared for equality.
    #[error("type mismatch for join key `{build_key}` = `{probe_key}`: {build_type} vs {probe_type}")]
    KeyTypeMismatch {
        build_key: String,
        probe_key: String,
        build_type: String,
        probe_type: String,
    },

    /// The requested kind/strictness combination is not supported.
    #[error("unsupported join: {detail}")]
    Unsupported { detail: String },

    /// Settings failed to parse or validate.
    #[error("invalid join settings: {detail}")]
    InvalidConfig { detail: String },

    /// A size limit configured with overflow mode `throw` was exceeded.
    #[error(
        "limit for {operator} exceeded: rows {rows} (max {max_rows}), bytes {bytes} (max {max_bytes})"
    )]
    SizeLimitExceeded {
        operator: &'static str,
        rows: usize,
        bytes: usize,
        max_rows: usize,
        max_bytes: usize,
    },

    /// A batch could not be built or was malformed.
    #[error("batch error: {detail}")]
    Batch { detail: String },

    /// An internal invariant was violated.
    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl JoinError {
    /// Shorthand for [`JoinError::Internal`].
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    /// Shorthand for [`JoinError::Batch`].
    pub fn batch(detail: impl Into<String>) -> Self {
        Self::Batch {
            detail: detail.into(),
        }
    }

    /// Shorthand for [`JoinError::InvalidConfig`].
    pub fn config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// True for errors raised while a join is being set up.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidShardCount { .. }
                | Self::KeyArityMismatch { .. }
                | Self::UnknownColumn { .. }
                | Self::KeyTypeMismatch { .. }
                | Self::Unsupported { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// True for violated invariants that indicate an upstream bug.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_message_names_operator_and_counts() {
        let err = JoinError::SizeLimitExceeded {
            operator: "JOIN",
            rows: 2,
            bytes: 32,
            max_rows: 1,
            max_bytes: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("JOIN"));
        assert!(msg.contains("rows 2"));
        assert!(!err.is_configuration());
        assert!(!err.is_internal());
    }

    #[test]
    fn classification() {
        assert!(JoinError::InvalidShardCount { count: 0 }.is_configuration());
        assert!(JoinError::config("bad").is_configuration());
        assert!(JoinError::internal("not_processed should be empty").is_internal());
        assert!(!JoinError::batch("short column").is_internal());
    }
}
