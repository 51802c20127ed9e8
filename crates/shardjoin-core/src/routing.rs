//! Row-to-shard routing.
//!
//! A row's shard is `xxh3(key tuple) % shard_count`, where the key tuple is
//! encoded by [`EncodedKey`](shardjoin_types::EncodedKey). Both sides use the
//! same function over their own key columns, so equal key tuples land in the
//! same shard as long as the two sides' key types belong to the same family.

use std::fmt;

use shardjoin_error::{JoinError, Result};
use shardjoin_types::{Batch, Column, ColumnSpec, TableJoin, hash_key_columns};

/// Which input of the join a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    /// The side stored in the hash tables.
    Build,
    /// The side streamed against the stored rows.
    Probe,
}

impl JoinSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Probe => "probe",
        }
    }
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key columns of one side and the shard count they are reduced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSpec {
    key_column_names: Vec<String>,
    key_column_indices: Vec<usize>,
    shard_count: usize,
}

impl RoutingSpec {
    /// Resolve `key_names` against `schema`.
    ///
    /// # Errors
    ///
    /// [`JoinError::InvalidShardCount`] for zero shards,
    /// [`JoinError::UnknownColumn`] for a key missing from `schema`.
    pub fn new(schema: &[ColumnSpec], key_names: &[String], shard_count: usize) -> Result<Self> {
        Self::resolve(schema, key_names, shard_count, "input")
    }

    /// Routing for one side of `table_join`. AS-OF joins route on their
    /// equality keys only.
    pub fn for_join(
        table_join: &TableJoin,
        side: JoinSide,
        schema: &[ColumnSpec],
        shard_count: usize,
    ) -> Result<Self> {
        let keys = match side {
            JoinSide::Build => table_join.build_keys(),
            JoinSide::Probe => table_join.probe_keys(),
        };
        let keys = &keys[..table_join.equality_key_count()];
        Self::resolve(schema, keys, shard_count, side.as_str())
    }

    fn resolve(
        schema: &[ColumnSpec],
        key_names: &[String],
        shard_count: usize,
        side: &'static str,
    ) -> Result<Self> {
        if shard_count == 0 {
            return Err(JoinError::InvalidShardCount { count: shard_count });
        }
        if key_names.is_empty() {
            return Err(JoinError::Unsupported {
                detail: "routing requires at least one key column".to_owned(),
            });
        }
        let key_column_indices = key_names
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
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            key_column_names: key_names.to_vec(),
            key_column_indices,
            shard_count,
        })
    }

    #[must_use]
    pub const fn shard_count(&self) -> usize {
        self.shard_count
    }

    #[must_use]
    pub fn key_column_names(&self) -> &[String] {
        &self.key_column_names
    }

    #[must_use]
    pub fn key_column_indices(&self) -> &[usize] {
        &self.key_column_indices
    }

    /// Name of the per-row shard-index expression, e.g. `xxh3(id,region) % 4`.
    #[must_use]
    pub fn routing_column_name(&self) -> String {
        format!(
            "xxh3({}) % {}",
            self.key_column_names.join(","),
            self.shard_count
        )
    }

    /// One `<routing column> = i` predicate name per shard.
    #[must_use]
    pub fn shard_predicate_names(&self) -> Vec<String> {
        let base = self.routing_column_name();
        (0..self.shard_count)
            .map(|shard| format!("{base} = {shard}"))
            .collect()
    }

    /// Shard index of a key hash.
    #[must_use]
    pub const fn shard_of_hash(&self, hash: u64) -> usize {
        (hash % self.shard_count as u64) as usize
    }

    /// Shard index of every row of `batch`, in row order.
    ///
    /// # Errors
    ///
    /// [`JoinError::Batch`] when `batch` does not carry the key columns at
    /// the resolved positions.
    pub fn route(&self, batch: &Batch) -> Result<Vec<usize>> {
        let key_columns = self.key_columns(batch)?;
        Ok(hash_key_columns(&key_columns, batch.row_count())
            .into_iter()
            .map(|hash| self.shard_of_hash(hash))
            .collect())
    }

    fn key_columns<'a>(&self, batch: &'a Batch) -> Result<Vec<&'a Column>> {
        self.key_column_indices
            .iter()
            .zip(&self.key_column_names)
            .map(|(&idx, name)| match batch.column(idx) {
                Some(column) if column.spec.name == *name => Ok(column),
                _ => Err(JoinError::batch(format!(
                    "batch has no key column `{name}` at position {idx}"
                ))),
            })
            .collect()
    }
}
