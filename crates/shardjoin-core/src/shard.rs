//! One partition of the concurrent join.
//!
//! A shard owns its engine behind a reader-writer lock: inserts take it
//! exclusively, probes and introspection share it. Row count, byte count and
//! the always-empty flag are republished to atomics while the write guard is
//! held, so totals can be summed without touching any lock.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockWriteGuard};
use shardjoin_error::Result;
use shardjoin_local::{LocalJoinEngine, ProbeOutput};
use shardjoin_types::Batch;

use crate::metrics::record_insert_contention;

/// Counters of one shard at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShardStats {
    pub id: usize,
    pub rows: usize,
    pub bytes: usize,
    pub contention_events: u64,
}

#[derive(Debug)]
pub struct Shard<E> {
    id: usize,
    engine: RwLock<E>,
    rows: AtomicUsize,
    bytes: AtomicUsize,
    always_empty: AtomicBool,
    contention_events: AtomicU64,
}

/// Exclusive access to a shard's engine.
pub struct ShardWriter<'a, E> {
    shard: &'a Shard<E>,
    engine: RwLockWriteGuard<'a, E>,
}

impl<E: LocalJoinEngine> ShardWriter<'_, E> {
    /// Insert into the engine and republish the shard's counters.
    pub fn insert(&mut self, batch: Batch, check_limits: bool) -> Result<bool> {
        let outcome = self.engine.insert(batch, check_limits);
        // The engine may have stored rows even when it reports an error.
        self.shard.publish(&self.engine);
        outcome
    }
}

impl<E: LocalJoinEngine> Shard<E> {
    pub fn new(id: usize, engine: E) -> Self {
        Self {
            id,
            rows: AtomicUsize::new(engine.row_count()),
            bytes: AtomicUsize::new(engine.byte_count()),
            always_empty: AtomicBool::new(engine.always_empty()),
            engine: RwLock::new(engine),
            contention_events: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    fn publish(&self, engine: &E) {
        self.rows.store(engine.row_count(), Ordering::Relaxed);
        self.bytes.store(engine.byte_count(), Ordering::Relaxed);
        self.always_empty.store(engine.always_empty(), Ordering::Relaxed);
    }

    /// Exclusive access if nobody else holds the shard. A miss counts as a
    /// contention event.
    pub fn try_writer(&self) -> Option<ShardWriter<'_, E>> {
        match self.engine.try_write() {
            Some(engine) => Some(ShardWriter {
                shard: self,
                engine,
            }),
            None => {
                self.contention_events.fetch_add(1, Ordering::Relaxed);
                record_insert_contention();
                None
            }
        }
    }

    /// Exclusive access, blocking until the shard is free.
    pub fn writer(&self) -> ShardWriter<'_, E> {
        ShardWriter {
            shard: self,
            engine: self.engine.write(),
        }
    }

    /// Probe under the shared guard.
    pub fn probe(&self, batch: &Batch) -> Result<ProbeOutput> {
        self.engine.read().probe(batch)
    }

    /// Run `f` against the engine under the shared guard.
    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&self.engine.read())
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn byte_count(&self) -> usize {
        self.bytes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn always_empty(&self) -> bool {
        self.always_empty.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> ShardStats {
        ShardStats {
            id: self.id,
            rows: self.row_count(),
            bytes: self.byte_count(),
            contention_events: self.contention_events.load(Ordering::Relaxed),
        }
    }
}
