//! Single-partition hash join.
//!
//! [`LocalJoinEngine`] is the contract a shard of the concurrent join relies
//! on; [`LocalHashJoin`] is the in-memory implementation.

pub mod hash_join;

use shardjoin_error::Result;
use shardjoin_types::{Batch, ColumnSpec};

pub use hash_join::{LocalHashJoin, LocalJoinOptions};

/// Result of probing one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutput {
    /// Joined rows.
    pub batch: Batch,
    /// Probe rows the engine did not get to, in input order. `None` when the
    /// whole input was handled.
    pub not_processed: Option<Batch>,
}

impl ProbeOutput {
    #[must_use]
    pub const fn complete(batch: Batch) -> Self {
        Self {
            batch,
            not_processed: None,
        }
    }
}

/// One partition's join state.
///
/// `insert` requires exclusive access; the read-only methods may run
/// concurrently with each other.
pub trait LocalJoinEngine: Send + Sync {
    /// Store a build-side batch. Returns `false` when a size limit with
    /// overflow mode `Break` was reached.
    fn insert(&mut self, batch: Batch, check_limits: bool) -> Result<bool>;

    /// Join a probe-side batch against the stored build rows.
    fn probe(&self, batch: &Batch) -> Result<ProbeOutput>;

    /// Stored build rows.
    fn row_count(&self) -> usize;

    /// Stored build bytes.
    fn byte_count(&self) -> usize;

    /// True when probing can produce no output at all.
    fn always_empty(&self) -> bool;

    /// Check that the probe key columns of `probe_schema` are comparable
    /// with the build keys.
    fn validate_key_types(&self, probe_schema: &[ColumnSpec]) -> Result<()>;

    /// Build rows no probe matched, in the probe output schema.
    fn non_joined_rows(&self) -> Result<Batch>;
}
