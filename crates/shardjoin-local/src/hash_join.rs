//! In-memory hash join over stored build blocks.
//!
//! Build blocks are kept as inserted. The table is a dense list of build row
//! references with head/next collision chains keyed by the key hash, so
//! inserting a block never rehashes earlier rows. Probing walks the chain for
//! the probe key hash and compares full key encodings.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use hashbrown::HashMap;
use shardjoin_error::{JoinError, Result};
use shardjoin_types::{
    Batch, Column, ColumnSpec, EncodedKey, JoinStrictness, KeyFamily, SizeLimits, TableJoin, Value,
};
use tracing::{debug, error};

use crate::{LocalJoinEngine, ProbeOutput};

/// Per-engine knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalJoinOptions {
    /// For ANY strictness keep the last inserted row per key.
    pub any_take_last_row: bool,
    /// Limits checked by [`LocalJoinEngine::insert`] when asked to.
    pub size_limits: SizeLimits,
    /// Stop a probe once this many rows were produced and hand the rest back
    /// as not processed.
    pub max_joined_block_rows: Option<usize>,
}

/// Reference to one build row inside the stored blocks.
#[derive(Debug)]
struct BuildRow {
    key: EncodedKey,
    block: usize,
    row: usize,
    /// Inequality value for AS-OF joins, NULL otherwise.
    asof: Value,
}

/// Hash join state of one partition.
#[derive(Debug)]
pub struct LocalHashJoin {
    table_join: TableJoin,
    options: LocalJoinOptions,
    build_schema: Vec<ColumnSpec>,
    probe_schema: Vec<ColumnSpec>,
    build_key_columns: Vec<usize>,
    blocks: Vec<Batch>,
    rows: Vec<BuildRow>,
    /// Maps a key hash to the newest row of its collision chain.
    head: HashMap<u64, usize>,
    /// Parallel to `rows`: the next older row in the chain.
    next: Vec<Option<usize>>,
    /// Parallel to `rows`: set once a probe row matched. Only RIGHT and FULL
    /// joins read it.
    used: Vec<AtomicBool>,
    stored_rows: usize,
    stored_bytes: usize,
}

impl LocalHashJoin {
    /// # Errors
    ///
    /// Fails when a build key is missing from `build_schema`, when the AS-OF
    /// key is not numeric, or when `max_joined_block_rows` is zero.
    pub fn new(
        table_join: TableJoin,
        build_schema: &[ColumnSpec],
        probe_schema: &[ColumnSpec],
        options: LocalJoinOptions,
    ) -> Result<Self> {
        if options.max_joined_block_rows == Some(0) {
            return Err(JoinError::config("max_joined_block_rows must be positive"));
        }
        let build_key_columns = resolve_columns(build_schema, table_join.build_keys(), "build")?;
        if table_join.strictness() == JoinStrictness::Asof
            && let Some(&asof_idx) = build_key_columns.last()
        {
            let spec = &build_schema[asof_idx];
            if !matches!(
                spec.vector_type.key_family(),
                KeyFamily::Integer | KeyFamily::Float
            ) {
                return Err(JoinError::Unsupported {
                    detail: format!(
                        "ASOF key `{}` has non-numeric type {}",
                        spec.name, spec.vector_type
                    ),
                });
            }
        }
        Ok(Self {
            table_join,
            options,
            build_schema: build_schema.to_vec(),
            probe_schema: probe_schema.to_vec(),
            build_key_columns,
            blocks: Vec::new(),
            rows: Vec::new(),
            head: HashMap::new(),
            next: Vec::new(),
            used: Vec::new(),
            stored_rows: 0,
            stored_bytes: 0,
        })
    }

    #[must_use]
    pub const fn table_join(&self) -> &TableJoin {
        &self.table_join
    }

    /// Probe columns followed by build non-key columns.
    #[must_use]
    pub fn output_schema(&self, probe_schema: &[ColumnSpec]) -> Vec<ColumnSpec> {
        let mut schema = probe_schema.to_vec();
        schema.extend(
            self.build_payload_columns()
                .map(|idx| self.build_schema[idx].clone()),
        );
        schema
    }

    fn build_payload_columns(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.build_schema.len()).filter(|idx| !self.build_key_columns.contains(idx))
    }

    fn chain(&self, hash: u64) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.head.get(&hash).copied(), |&idx| {
            self.next.get(idx).copied().flatten()
        })
    }

    fn find_row(&self, key: &EncodedKey) -> Option<usize> {
        self.chain(key.hash64()).find(|&idx| self.rows[idx].key == *key)
    }

    fn push_row(&mut self, row: BuildRow, hash: Option<u64>) {
        let idx = self.rows.len();
        self.rows.push(row);
        self.used.push(AtomicBool::new(false));
        let older = hash.and_then(|hash| self.head.insert(hash, idx));
        self.next.push(older);
    }

    fn store_block(&mut self, batch: Batch) {
        let block = self.blocks.len();
        let strictness = self.table_join.strictness();
        let keep_unmatchable = self.table_join.kind().is_right_or_full();
        let equality_keys = self.table_join.equality_key_count();
        {
            let key_columns: Vec<&Column> = self.build_key_columns[..equality_keys]
                .iter()
                .filter_map(|&idx| batch.column(idx))
                .collect();
            let asof_column = if strictness == JoinStrictness::Asof {
                batch.column(self.build_key_columns[equality_keys])
            } else {
                None
            };

            for row in 0..batch.row_count() {
                let key = EncodedKey::encode(&key_columns, row);
                let asof = asof_column.map_or(Value::Null, |column| column.value_at(row));
                // NULL keys never match; outer kinds still report them as
                // non-joined.
                if key.has_null() || (asof_column.is_some() && asof.is_null()) {
                    if keep_unmatchable {
                        self.push_row(
                            BuildRow {
                                key,
                                block,
                                row,
                                asof,
                            },
                            None,
                        );
                    }
                    continue;
                }
                if strictness == JoinStrictness::Any
                    && let Some(existing) = self.find_row(&key)
                {
                    if self.options.any_take_last_row {
                        self.rows[existing].block = block;
                        self.rows[existing].row = row;
                        self.used[existing].store(false, AtomicOrdering::Relaxed);
                    }
                    continue;
                }
                let hash = key.hash64();
                self.push_row(
                    BuildRow {
                        key,
                        block,
                        row,
                        asof,
                    },
                    Some(hash),
                );
            }
        }
        self.stored_rows += batch.row_count();
        self.stored_bytes += batch.byte_size();
        self.blocks.push(batch);
    }

    /// Build rows matching `key`, oldest first. For AS-OF joins at most the
    /// one row whose inequality value is the greatest not above `asof`.
    fn matches(&self, key: &EncodedKey, asof: Option<&Value>) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .chain(key.hash64())
            .filter(|&idx| self.rows[idx].key == *key)
            .collect();
        // Chains run newest to oldest.
        found.reverse();
        let Some(target) = asof else {
            return found;
        };
        let mut best: Option<usize> = None;
        for idx in found {
            let candidate = &self.rows[idx].asof;
            if !matches!(
                candidate.numeric_cmp(target),
                Some(Ordering::Less | Ordering::Equal)
            ) {
                continue;
            }
            let better = best.is_none_or(|current| {
                self.rows[current].asof.numeric_cmp(candidate) == Some(Ordering::Less)
            });
            if better {
                best = Some(idx);
            }
        }
        best.into_iter().collect()
    }

    fn row_refs(&self, build_rows: &[Option<usize>]) -> Vec<Option<(usize, usize)>> {
        build_rows
            .iter()
            .map(|entry| entry.map(|idx| (self.rows[idx].block, self.rows[idx].row)))
            .collect()
    }

    fn block_columns(&self, column: usize) -> Vec<&Column> {
        self.blocks
            .iter()
            .filter_map(|block| block.column(column))
            .collect()
    }

    fn push_build_payload(
        &self,
        columns: &mut Vec<Column>,
        refs: &[Option<(usize, usize)>],
    ) -> Result<()> {
        for idx in self.build_payload_columns() {
            let sources = self.block_columns(idx);
            columns.push(Column::gather_many(
                &self.build_schema[idx],
                &sources,
                refs,
            )?);
        }
        Ok(())
    }

    fn assemble(
        &self,
        probe: &Batch,
        probe_rows: &[usize],
        build_rows: &[Option<usize>],
    ) -> Result<Batch> {
        if probe_rows.is_empty() {
            return Ok(Batch::empty(&self.output_schema(&probe.schema())));
        }
        let probe_indices: Vec<Option<usize>> = probe_rows.iter().copied().map(Some).collect();
        let mut columns = probe
            .columns()
            .iter()
            .map(|column| column.gather(&probe_indices))
            .collect::<Result<Vec<_>>>()?;
        self.push_build_payload(&mut columns, &self.row_refs(build_rows))?;
        Batch::new(columns)
    }
}

impl LocalJoinEngine for LocalHashJoin {
    fn insert(&mut self, batch: Batch, check_limits: bool) -> Result<bool> {
        if batch.schema() != self.build_schema {
            error!(
                expected_columns = self.build_schema.len(),
                actual_columns = batch.columns().len(),
                "build block schema mismatch"
            );
            return Err(JoinError::batch(
                "build block schema differs from the join's build schema",
            ));
        }
        if !batch.is_empty() {
            self.store_block(batch);
        }
        if check_limits {
            return self
                .options
                .size_limits
                .check(self.stored_rows, self.stored_bytes, "JOIN");
        }
        Ok(true)
    }

    fn probe(&self, batch: &Batch) -> Result<ProbeOutput> {
        let input_rows = batch.row_count();
        let probe_key_columns =
            resolve_columns(&batch.schema(), self.table_join.probe_keys(), "probe")?;
        let strictness = self.table_join.strictness();
        let equality_keys = self.table_join.equality_key_count();
        let emit_unmatched = self.table_join.emits_unmatched_probe_rows();
        let mark_used = self.table_join.kind().is_right_or_full();

        let key_columns: Vec<&Column> = probe_key_columns[..equality_keys]
            .iter()
            .filter_map(|&idx| batch.column(idx))
            .collect();
        let asof_column = if strictness == JoinStrictness::Asof {
            batch.column(probe_key_columns[equality_keys])
        } else {
            None
        };

        // Collect (probe_row, build_row) pairs.
        let mut probe_rows: Vec<usize> = Vec::new();
        let mut build_rows: Vec<Option<usize>> = Vec::new();
        let mut not_processed = None;

        for probe_row in 0..input_rows {
            let key = EncodedKey::encode(&key_columns, probe_row);
            let asof = asof_column.map(|column| column.value_at(probe_row));
            let matches = if key.has_null() || asof.as_ref().is_some_and(Value::is_null) {
                Vec::new()
            } else {
                self.matches(&key, asof.as_ref())
            };
            if mark_used {
                for &idx in &matches {
                    self.used[idx].store(true, AtomicOrdering::Relaxed);
                }
            }

            match strictness {
                JoinStrictness::Semi => {
                    // Once per probe row.
                    if let Some(&first) = matches.first() {
                        probe_rows.push(probe_row);
                        build_rows.push(Some(first));
                    }
                }
                JoinStrictness::Anti => {
                    if matches.is_empty() && emit_unmatched {
                        probe_rows.push(probe_row);
                        build_rows.push(None);
                    }
                }
                JoinStrictness::Any
                | JoinStrictness::All
                | JoinStrictness::Unspecified
                | JoinStrictness::Asof => {
                    if matches.is_empty() {
                        if emit_unmatched {
                            probe_rows.push(probe_row);
                            build_rows.push(None);
                        }
                    } else {
                        for idx in matches {
                            probe_rows.push(probe_row);
                            build_rows.push(Some(idx));
                        }
                    }
                }
            }

            if let Some(limit) = self.options.max_joined_block_rows
                && probe_rows.len() >= limit
                && probe_row + 1 < input_rows
            {
                not_processed = Some(batch.slice(probe_row + 1, input_rows)?);
                break;
            }
        }

        let joined = self.assemble(batch, &probe_rows, &build_rows)?;

        let _span = tracing::debug_span!(
            "local_hash_join",
            batch_size = input_rows,
            output_rows = joined.row_count(),
            kind = %self.table_join.kind(),
            strictness = %strictness,
            op = "probe",
        )
        .entered();
        if let Some(rest) = &not_processed {
            debug!(remaining_rows = rest.row_count(), "probe stopped at block limit");
        }

        Ok(ProbeOutput {
            batch: joined,
            not_processed,
        })
    }

    fn row_count(&self) -> usize {
        self.stored_rows
    }

    fn byte_count(&self) -> usize {
        self.stored_bytes
    }

    fn always_empty(&self) -> bool {
        self.stored_rows == 0 && !self.table_join.emits_unmatched_probe_rows()
    }

    fn validate_key_types(&self, probe_schema: &[ColumnSpec]) -> Result<()> {
        let pairs = self
            .build_key_columns
            .iter()
            .zip(self.table_join.probe_keys());
        for (&build_idx, probe_name) in pairs {
            let build_spec = &self.build_schema[build_idx];
            let probe_spec = probe_schema
                .iter()
                .find(|spec| spec.name == *probe_name)
                .ok_or_else(|| JoinError::UnknownColumn {
                    name: probe_name.clone(),
                    side: "probe",
                })?;
            if build_spec.vector_type.key_family() != probe_spec.vector_type.key_family() {
                return Err(JoinError::KeyTypeMismatch {
                    build_key: build_spec.name.clone(),
                    probe_key: probe_spec.name.clone(),
                    build_type: build_spec.vector_type.to_string(),
                    probe_type: probe_spec.vector_type.to_string(),
                });
            }
        }
        Ok(())
    }

    fn non_joined_rows(&self) -> Result<Batch> {
        let strictness = self.table_join.strictness();
        if !self.table_join.kind().is_right_or_full()
            || matches!(strictness, JoinStrictness::Semi | JoinStrictness::Asof)
        {
            return Ok(Batch::empty(&self.output_schema(&self.probe_schema)));
        }

        let refs: Vec<Option<(usize, usize)>> = self
            .rows
            .iter()
            .zip(&self.used)
            .filter(|(_, used)| !used.load(AtomicOrdering::Relaxed))
            .map(|(row, _)| Some((row.block, row.row)))
            .collect();

        let probe_keys = resolve_columns(&self.probe_schema, self.table_join.probe_keys(), "probe")?;
        let mut columns = Vec::with_capacity(self.probe_schema.len() + self.build_schema.len());
        for (idx, spec) in self.probe_schema.iter().enumerate() {
            // Probe key columns carry the build key values.
            let column = match probe_keys.iter().position(|&key| key == idx) {
                Some(key_pos) => {
                    let sources = self.block_columns(self.build_key_columns[key_pos]);
                    Column::gather_many(spec, &sources, &refs)?
                }
                None => Column::nulls(spec.clone(), refs.len())?,
            };
            columns.push(column);
        }
        self.push_build_payload(&mut columns, &refs)?;
        Batch::new(columns)
    }
}

fn resolve_columns(
    schema: &[ColumnSpec],
    names: &[String],
    side: &'static str,
) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            schema
                .iter()
                .position(|spec| spec.name == *name)
                .ok_or_else(|| JoinError::UnknownColumn {
                    name: name.clone(),
                    side,
                })
        })
        .collect()
}
