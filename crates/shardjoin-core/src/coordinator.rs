//! The concurrent hash join.
//!
//! A fixed set of shards, each owning one [`LocalJoinEngine`]. Build batches
//! are split by the build-side routing and inserted shard by shard; probe
//! batches are split by the probe-side routing, probed shard by shard and
//! glued back together in shard order.

use parking_lot::Mutex;
use smallvec::SmallVec;
use shardjoin_error::{JoinError, Result};
use shardjoin_local::{LocalHashJoin, LocalJoinEngine, LocalJoinOptions};
use shardjoin_types::{
    Batch, ColumnSpec, JoinSettings, JoinStrictness, SizeLimits, TableJoin,
};
use tracing::{debug, error, info};

use crate::dispatch::RowRouter;
use crate::metrics::{record_blocking_wait, record_build_block, record_probe_block};
use crate::non_joined::NonJoinedRows;
use crate::routing::{JoinSide, RoutingSpec};
use crate::shard::{Shard, ShardStats};

/// Hash join partitioned over independently locked shards.
///
/// Shared between threads through `Arc`. Any number of threads may call
/// [`add_joined_block`](Self::add_joined_block) concurrently; probing is
/// complete only once every build call has returned.
#[derive(Debug)]
pub struct ConcurrentHashJoin<E = LocalHashJoin> {
    table_join: TableJoin,
    settings: JoinSettings,
    build_routing: RoutingSpec,
    probe_routing: RoutingSpec,
    build_schema: Vec<ColumnSpec>,
    probe_schema: Vec<ColumnSpec>,
    shards: Vec<Shard<E>>,
    totals: Mutex<Option<Batch>>,
}

impl ConcurrentHashJoin<LocalHashJoin> {
    /// One [`LocalHashJoin`] per shard.
    ///
    /// Size limits are enforced on the totals across shards, not per
    /// engine.
    ///
    /// # Errors
    ///
    /// Any configuration error of [`ConcurrentHashJoin::new`] or
    /// [`LocalHashJoin::new`].
    pub fn with_local_engines(
        settings: JoinSettings,
        table_join: TableJoin,
        build_schema: &[ColumnSpec],
        probe_schema: &[ColumnSpec],
    ) -> Result<Self> {
        let options = LocalJoinOptions {
            any_take_last_row: settings.any_take_last_row,
            size_limits: SizeLimits::unlimited(),
            max_joined_block_rows: None,
        };
        let engine_join = table_join.clone();
        Self::new(settings, table_join, build_schema, probe_schema, |_| {
            LocalHashJoin::new(engine_join.clone(), build_schema, probe_schema, options)
        })
    }
}

impl<E: LocalJoinEngine> ConcurrentHashJoin<E> {
    /// Build `settings.shard_count` shards with engines from `factory`,
    /// called once per shard id in ascending order.
    ///
    /// # Errors
    ///
    /// [`JoinError::InvalidShardCount`] for zero shards, unknown key columns
    /// on either side, [`JoinError::KeyTypeMismatch`] when a build key and its
    /// probe key belong to different key families, invalid settings, or the
    /// first factory error.
    pub fn new<F>(
        settings: JoinSettings,
        table_join: TableJoin,
        build_schema: &[ColumnSpec],
        probe_schema: &[ColumnSpec],
        mut factory: F,
    ) -> Result<Self>
    where
        F: FnMut(usize) -> Result<E>,
    {
        settings.validate()?;
        let shard_count = settings.shard_count;
        let build_routing =
            RoutingSpec::for_join(&table_join, JoinSide::Build, build_schema, shard_count)?;
        let probe_routing =
            RoutingSpec::for_join(&table_join, JoinSide::Probe, probe_schema, shard_count)?;
        check_key_families(
            &table_join,
            (&build_routing, build_schema),
            (&probe_routing, probe_schema),
        )
        .inspect_err(|err| error!(%err, "join key types do not line up"))?;
        let shards = (0..shard_count)
            .map(|id| factory(id).map(|engine| Shard::new(id, engine)))
            .collect::<Result<Vec<_>>>()?;

        info!(
            shard_count,
            kind = %table_join.kind(),
            strictness = %table_join.strictness(),
            build_routing = %build_routing.routing_column_name(),
            probe_routing = %probe_routing.routing_column_name(),
            "concurrent hash join created"
        );

        Ok(Self {
            table_join,
            settings,
            build_routing,
            probe_routing,
            build_schema: build_schema.to_vec(),
            probe_schema: probe_schema.to_vec(),
            shards,
            totals: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub const fn table_join(&self) -> &TableJoin {
        &self.table_join
    }

    #[must_use]
    pub const fn settings(&self) -> &JoinSettings {
        &self.settings
    }

    #[must_use]
    pub fn build_schema(&self) -> &[ColumnSpec] {
        &self.build_schema
    }

    #[must_use]
    pub fn probe_schema(&self) -> &[ColumnSpec] {
        &self.probe_schema
    }

    /// Routing of one side.
    #[must_use]
    pub const fn routing(&self, side: JoinSide) -> &RoutingSpec {
        match side {
            JoinSide::Build => &self.build_routing,
            JoinSide::Probe => &self.probe_routing,
        }
    }

    /// Per-shard counters, in shard order.
    #[must_use]
    pub fn shard_stats(&self) -> Vec<ShardStats> {
        self.shards.iter().map(Shard::stats).collect()
    }

    /// Insert a build-side batch.
    ///
    /// Sub-batches are inserted into whichever pending shard is free first.
    /// When every pending shard is busy the call blocks on the first of them
    /// rather than spinning. With `check_limits` the totals across all
    /// shards are checked against the configured size limits afterwards.
    ///
    /// Returns `false` when a limit with overflow mode `Break` was reached;
    /// the caller should stop feeding the build side.
    ///
    /// # Errors
    ///
    /// Routing failures, engine insert failures, and
    /// [`JoinError::SizeLimitExceeded`] under overflow mode `Throw`.
    pub fn add_joined_block(&self, batch: &Batch, check_limits: bool) -> Result<bool> {
        let _span = tracing::debug_span!(
            "concurrent_join",
            op = "add_joined_block",
            rows = batch.row_count(),
            shard_count = self.shards.len(),
        )
        .entered();

        let parts = RowRouter::new(&self.build_routing).dispatch(batch)?;
        record_build_block();

        let mut pending: SmallVec<[(usize, Batch); 16]> = parts
            .into_iter()
            .enumerate()
            .filter(|(_, part)| !part.is_empty())
            .collect();
        let shards_touched = pending.len();
        let mut within_limits = true;
        let mut blocking_waits = 0_usize;

        while !pending.is_empty() {
            let before = pending.len();
            let mut idx = 0;
            while idx < pending.len() {
                let Some(mut writer) = self.shards[pending[idx].0].try_writer() else {
                    idx += 1;
                    continue;
                };
                let (_, part) = pending.remove(idx);
                within_limits &= writer.insert(part, check_limits)?;
            }
            if pending.len() == before {
                // Every pending shard is held by another thread.
                record_blocking_wait();
                blocking_waits += 1;
                let (shard_id, part) = pending.remove(0);
                within_limits &= self.shards[shard_id]
                    .writer()
                    .insert(part, check_limits)?;
            }
        }

        if check_limits {
            let rows = self.total_row_count();
            let bytes = self.total_byte_count();
            within_limits &= self
                .settings
                .size_limits
                .check(rows, bytes, "JOIN")
                .inspect_err(|err| error!(rows, bytes, %err, "join build side over limit"))?;
        }

        debug!(
            shards_touched,
            blocking_waits,
            within_limits,
            total_rows = self.total_row_count(),
            "build block inserted"
        );
        Ok(within_limits)
    }

    /// Join a probe-side batch against every shard.
    ///
    /// The result holds shard 0's output rows, then shard 1's, and so on;
    /// within a shard rows keep the engine's order.
    ///
    /// # Errors
    ///
    /// Routing or engine failures, and [`JoinError::Internal`] when an engine
    /// leaves probe rows unprocessed or shards disagree on the output schema.
    pub fn join_block(&self, batch: &Batch) -> Result<Batch> {
        let _span = tracing::debug_span!(
            "concurrent_join",
            op = "join_block",
            rows = batch.row_count(),
            shard_count = self.shards.len(),
        )
        .entered();

        let parts = RowRouter::new(&self.probe_routing).dispatch(batch)?;
        record_probe_block();

        let mut outputs = Vec::with_capacity(self.shards.len());
        for (shard, part) in self.shards.iter().zip(parts) {
            let output = shard.probe(&part)?;
            if let Some(rest) = output.not_processed {
                error!(
                    shard = shard.id(),
                    unprocessed_rows = rest.row_count(),
                    "shard probe left rows unprocessed"
                );
                return Err(JoinError::internal(format!(
                    "shard {} left {} probe rows unprocessed",
                    shard.id(),
                    rest.row_count()
                )));
            }
            outputs.push(output.batch);
        }

        let joined = concat_shard_outputs(&outputs)?;
        debug!(output_rows = joined.row_count(), "probe block joined");
        Ok(joined)
    }

    /// Check that `probe_schema`'s key columns are comparable with the build
    /// keys. Every shard runs the same engine configuration, so shard 0
    /// answers for all.
    pub fn check_types_of_keys(&self, probe_schema: &[ColumnSpec]) -> Result<()> {
        let shard = self
            .shards
            .first()
            .ok_or_else(|| JoinError::internal("concurrent join has no shards"))?;
        shard.with_engine(|engine| engine.validate_key_types(probe_schema))
    }

    /// Store the totals batch. Empty batches are ignored.
    pub fn set_totals(&self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        *self.totals.lock() = Some(batch);
    }

    #[must_use]
    pub fn totals(&self) -> Option<Batch> {
        self.totals.lock().clone()
    }

    /// Sum of the shards' published row counts.
    #[must_use]
    pub fn total_row_count(&self) -> usize {
        self.shards.iter().map(Shard::row_count).sum()
    }

    /// Sum of the shards' published byte counts.
    #[must_use]
    pub fn total_byte_count(&self) -> usize {
        self.shards.iter().map(Shard::byte_count).sum()
    }

    /// True when no shard could produce any output.
    #[must_use]
    pub fn always_returns_empty_set(&self) -> bool {
        self.shards.iter().all(Shard::always_empty)
    }

    /// Build rows that no probe row matched, in blocks of at most
    /// `max_block_size` rows.
    ///
    /// `Ok(None)` when the join kind never reports such rows: SEMI and ASOF
    /// strictness, and kinds other than RIGHT and FULL.
    ///
    /// # Errors
    ///
    /// [`JoinError::InvalidConfig`] for a zero block size, and
    /// [`JoinError::Internal`] for a RIGHT or FULL join whose strictness was
    /// never resolved.
    pub fn non_joined_rows_provider(
        &self,
        max_block_size: usize,
    ) -> Result<Option<NonJoinedRows<'_, E>>> {
        if max_block_size == 0 {
            return Err(JoinError::config("non-joined block size must be positive"));
        }
        let kind = self.table_join.kind();
        let strictness = self.table_join.strictness();
        if matches!(strictness, JoinStrictness::Semi | JoinStrictness::Asof)
            || !kind.is_right_or_full()
        {
            return Ok(None);
        }
        if strictness == JoinStrictness::Unspecified {
            error!(%kind, %strictness, "non-joined rows requested for unresolved strictness");
            return Err(JoinError::internal(format!(
                "invalid join type for non-joined rows: {kind} {strictness}"
            )));
        }
        Ok(Some(NonJoinedRows::new(&self.shards, max_block_size)))
    }

    /// [`non_joined_rows_provider`](Self::non_joined_rows_provider) with the
    /// configured block size.
    pub fn non_joined_rows(&self) -> Result<Option<NonJoinedRows<'_, E>>> {
        self.non_joined_rows_provider(self.settings.non_joined_block_rows)
    }
}

fn concat_shard_outputs(outputs: &[Batch]) -> Result<Batch> {
    let Some(first) = outputs.first() else {
        return Err(JoinError::internal("no shard outputs to concatenate"));
    };
    let schema = first.schema();
    if let Some((shard, _)) = outputs
        .iter()
        .enumerate()
        .find(|(_, output)| output.schema() != schema)
    {
        error!(shard, "shard output schema differs from shard 0");
        return Err(JoinError::internal(format!(
            "shard {shard} produced a different output schema than shard 0"
        )));
    }
    Batch::concat(outputs)
}

/// Every build key must pair with a probe key of the same key family.
/// Equal values of different families encode differently, so they would
/// route to different shards and never match.
fn check_key_families(
    table_join: &TableJoin,
    (build_routing, build_schema): (&RoutingSpec, &[ColumnSpec]),
    (probe_routing, probe_schema): (&RoutingSpec, &[ColumnSpec]),
) -> Result<()> {
    let mut pairs: Vec<(&ColumnSpec, &ColumnSpec)> = build_routing
        .key_column_indices()
        .iter()
        .zip(probe_routing.key_column_indices())
        .map(|(&b, &p)| (&build_schema[b], &probe_schema[p]))
        .collect();
    // The AS-OF column takes no part in routing but is still compared.
    if table_join.strictness() == JoinStrictness::Asof
        && let (Some(build_name), Some(probe_name)) =
            (table_join.build_keys().last(), table_join.probe_keys().last())
    {
        pairs.push((
            key_spec(build_schema, build_name, "build")?,
            key_spec(probe_schema, probe_name, "probe")?,
        ));
    }
    for (build, probe) in pairs {
        if build.vector_type.key_family() != probe.vector_type.key_family() {
            return Err(JoinError::KeyTypeMismatch {
                build_key: build.name.clone(),
                probe_key: probe.name.clone(),
                build_type: build.vector_type.to_string(),
                probe_type: probe.vector_type.to_string(),
            });
        }
    }
    Ok(())
}

fn key_spec<'a>(
    schema: &'a [ColumnSpec],
    name: &str,
    side: &'static str,
) -> Result<&'a ColumnSpec> {
    schema
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| JoinError::UnknownColumn {
            name: name.to_owned(),
            side,
        })
}
