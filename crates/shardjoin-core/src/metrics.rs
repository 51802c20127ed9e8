//! Process-local join counters.
//!
//! Counters are shared by every [`crate::ConcurrentHashJoin`] in the process
//! and updated with relaxed atomics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the join counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinMetricsSnapshot {
    /// Rows routed to shards, both sides.
    pub rows_dispatched_total: u64,
    /// Build-side batches accepted by `add_joined_block`.
    pub build_blocks_total: u64,
    /// Probe-side batches joined by `join_block`.
    pub probe_blocks_total: u64,
    /// Shard acquisitions that found the shard busy.
    pub insert_contention_total: u64,
    /// Scans that found every pending shard busy and had to block.
    pub blocking_waits_total: u64,
}

static ROWS_DISPATCHED_TOTAL: AtomicU64 = AtomicU64::new(0);
static BUILD_BLOCKS_TOTAL: AtomicU64 = AtomicU64::new(0);
static PROBE_BLOCKS_TOTAL: AtomicU64 = AtomicU64::new(0);
static INSERT_CONTENTION_TOTAL: AtomicU64 = AtomicU64::new(0);
static BLOCKING_WAITS_TOTAL: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_rows_dispatched(rows: usize) {
    let rows = u64::try_from(rows).unwrap_or(u64::MAX);
    ROWS_DISPATCHED_TOTAL.fetch_add(rows, Ordering::Relaxed);
}

pub(crate) fn record_build_block() {
    BUILD_BLOCKS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_probe_block() {
    PROBE_BLOCKS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_insert_contention() {
    INSERT_CONTENTION_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_blocking_wait() {
    BLOCKING_WAITS_TOTAL.fetch_add(1, Ordering::Relaxed);
}

/// Return a snapshot of the join counters.
#[must_use]
pub fn join_metrics_snapshot() -> JoinMetricsSnapshot {
    JoinMetricsSnapshot {
        rows_dispatched_total: ROWS_DISPATCHED_TOTAL.load(Ordering::Relaxed),
        build_blocks_total: BUILD_BLOCKS_TOTAL.load(Ordering::Relaxed),
        probe_blocks_total: PROBE_BLOCKS_TOTAL.load(Ordering::Relaxed),
        insert_contention_total: INSERT_CONTENTION_TOTAL.load(Ordering::Relaxed),
        blocking_waits_total: BLOCKING_WAITS_TOTAL.load(Ordering::Relaxed),
    }
}

/// Reset all join counters.
pub fn reset_join_metrics() {
    ROWS_DISPATCHED_TOTAL.store(0, Ordering::Relaxed);
    BUILD_BLOCKS_TOTAL.store(0, Ordering::Relaxed);
    PROBE_BLOCKS_TOTAL.store(0, Ordering::Relaxed);
    INSERT_CONTENTION_TOTAL.store(0, Ordering::Relaxed);
    BLOCKING_WAITS_TOTAL.store(0, Ordering::Relaxed);
}
