//! Sharded concurrent hash join.
//!
//! Rows of both join inputs are routed by a hash of their key tuple to one
//! of `N` shards. Each shard holds an independent hash table behind its own
//! lock, so build and probe work for different shards runs concurrently.
//!
//! - [`routing`]: key columns and the row-to-shard function of each side.
//! - [`dispatch`]: splitting a batch into per-shard sub-batches.
//! - [`shard`]: a locked engine plus lock-free published counters.
//! - [`coordinator`]: [`ConcurrentHashJoin`], the public entry point.
//! - [`non_joined`]: unmatched build rows of RIGHT and FULL joins.
//! - [`metrics`]: process-local counters.

pub mod coordinator;
pub mod dispatch;
pub mod metrics;
pub mod non_joined;
pub mod routing;
pub mod shard;

pub use coordinator::ConcurrentHashJoin;
pub use dispatch::{RowRouter, dispatch};
pub use metrics::{JoinMetricsSnapshot, join_metrics_snapshot, reset_join_metrics};
pub use non_joined::NonJoinedRows;
pub use routing::{JoinSide, RoutingSpec};
pub use shard::{Shard, ShardStats};

pub use shardjoin_error::{JoinError, Result};
pub use shardjoin_local::{LocalHashJoin, LocalJoinEngine, LocalJoinOptions, ProbeOutput};
pub use shardjoin_types::{
    Batch, ColumnSpec, ColumnVectorType, JoinKind, JoinSettings, JoinStrictness, OverflowMode,
    SizeLimits, TableJoin, Value,
};
