//! Splitting a batch into per-shard sub-batches.

use shardjoin_error::Result;
use shardjoin_types::Batch;

use crate::metrics::record_rows_dispatched;
use crate::routing::RoutingSpec;

/// Partitions batches according to a [`RoutingSpec`].
#[derive(Debug, Clone, Copy)]
pub struct RowRouter<'a> {
    spec: &'a RoutingSpec,
}

impl<'a> RowRouter<'a> {
    #[must_use]
    pub const fn new(spec: &'a RoutingSpec) -> Self {
        Self { spec }
    }

    /// Row indices of `batch` per shard, each list in ascending order.
    pub fn partition(&self, batch: &Batch) -> Result<Vec<Vec<usize>>> {
        let shards = self.spec.route(batch)?;
        let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); self.spec.shard_count()];
        for (row, shard) in shards.into_iter().enumerate() {
            buckets[shard].push(row);
        }
        Ok(buckets)
    }

    /// Exactly `shard_count` sub-batches; sub-batch `i` holds the rows routed
    /// to shard `i` in their original order, with every column of `batch`.
    ///
    /// # Errors
    ///
    /// Fails when `batch` does not carry the routing key columns.
    pub fn dispatch(&self, batch: &Batch) -> Result<Vec<Batch>> {
        if batch.is_empty() {
            // Still validate the key columns of the schema.
            self.spec.route(batch)?;
            return Ok(vec![
                Batch::empty(&batch.schema());
                self.spec.shard_count()
            ]);
        }
        let parts = self
            .partition(batch)?
            .iter()
            .map(|rows| batch.take(rows))
            .collect::<Result<Vec<_>>>()?;
        record_rows_dispatched(batch.row_count());
        Ok(parts)
    }
}

/// [`RowRouter::dispatch`] without naming the router.
pub fn dispatch(spec: &RoutingSpec, batch: &Batch) -> Result<Vec<Batch>> {
    RowRouter::new(spec).dispatch(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardjoin_types::{ColumnSpec, ColumnVectorType, Value};

    fn schema() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec::new("k", ColumnVectorType::Int64),
            ColumnSpec::new("v", ColumnVectorType::Text),
        ]
    }

    fn batch(n: i64) -> Batch {
        let rows: Vec<Vec<Value>> = (0..n)
            .map(|i| vec![Value::Integer(i % 7), Value::from(format!("v{i}"))])
            .collect();
        Batch::from_rows(&rows, &schema()).unwrap()
    }

    fn spec(shards: usize) -> RoutingSpec {
        RoutingSpec::new(&schema(), &["k".to_owned()], shards).unwrap()
    }

    #[test]
    fn empty_input_yields_empty_shards_with_schema() {
        let spec = spec(5);
        let parts = dispatch(&spec, &batch(0)).unwrap();
        assert_eq!(parts.len(), 5);
        for part in &parts {
            assert!(part.is_empty());
            assert_eq!(part.schema(), schema());
        }
    }

    #[test]
    fn parts_cover_input_in_order() {
        let spec = spec(4);
        let input = batch(40);
        let parts = dispatch(&spec, &input).unwrap();
        assert_eq!(parts.iter().map(Batch::row_count).sum::<usize>(), 40);

        let routes = spec.route(&input).unwrap();
        for (shard, part) in parts.iter().enumerate() {
            let expected: Vec<Vec<Value>> = (0..input.row_count())
                .filter(|&row| routes[row] == shard)
                .map(|row| input.row(row))
                .collect();
            assert_eq!(part.to_rows(), expected, "shard={shard}");
        }
    }

    #[test]
    fn equal_keys_share_a_shard() {
        let spec = spec(3);
        let parts = dispatch(&spec, &batch(21)).unwrap();
        for (shard, part) in parts.iter().enumerate() {
            for row in part.to_rows() {
                for (other, other_part) in parts.iter().enumerate() {
                    if other != shard {
                        assert!(
                            other_part.to_rows().iter().all(|r| r[0] != row[0]),
                            "key {} in shards {shard} and {other}",
                            row[0]
                        );
                    }
                }
            }
        }
    }
}
