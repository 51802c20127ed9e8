//! Streaming the build rows no probe matched.

use shardjoin_error::Result;
use shardjoin_local::LocalJoinEngine;
use shardjoin_types::Batch;

use crate::shard::Shard;

/// Iterator over the non-joined build rows of every shard, in shard order.
///
/// Each shard is asked for its rows when the iterator reaches it; its rows
/// are then handed out in blocks of at most `max_block_size` rows. Shards
/// without such rows yield nothing. After an error the iterator is exhausted.
pub struct NonJoinedRows<'a, E> {
    shards: &'a [Shard<E>],
    next_shard: usize,
    current: Option<Batch>,
    offset: usize,
    max_block_size: usize,
}

impl<'a, E: LocalJoinEngine> NonJoinedRows<'a, E> {
    pub(crate) const fn new(shards: &'a [Shard<E>], max_block_size: usize) -> Self {
        Self {
            shards,
            next_shard: 0,
            current: None,
            offset: 0,
            max_block_size,
        }
    }

    #[must_use]
    pub const fn max_block_size(&self) -> usize {
        self.max_block_size
    }
}

impl<E: LocalJoinEngine> Iterator for NonJoinedRows<'_, E> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = &self.current {
                if self.offset < current.row_count() {
                    let block = current.slice(self.offset, self.max_block_size);
                    self.offset += self.max_block_size;
                    return Some(block);
                }
                self.current = None;
            }
            let shard = self.shards.get(self.next_shard)?;
            self.next_shard += 1;
            match shard.with_engine(|engine| engine.non_joined_rows()) {
                Ok(rows) => {
                    self.current = Some(rows);
                    self.offset = 0;
                }
                Err(err) => {
                    self.next_shard = self.shards.len();
                    return Some(Err(err));
                }
            }
        }
    }
}
