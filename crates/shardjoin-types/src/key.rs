//! Canonical join-key encoding.
//!
//! A row's key tuple is encoded into one byte string: a type tag per value
//! followed by a family-normalized payload (integers widened to `i64`, floats
//! to `f64`, varlen values length-prefixed). Two rows compare equal on their
//! keys iff their encodings are equal, and the routing hash is computed over
//! the whole encoding, so multi-column keys hash as one tuple.

use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use crate::batch::{Column, ColumnData};

const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_FLOAT: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BINARY: u8 = 4;

/// Encoded key tuple of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EncodedKey {
    bytes: SmallVec<[u8; 32]>,
    has_null: bool,
}

impl EncodedKey {
    /// Encode the values of `columns` at `row`.
    #[must_use]
    pub fn encode(columns: &[&Column], row: usize) -> Self {
        let mut key = Self::default();
        for column in columns {
            key.push(column, row);
        }
        key
    }

    fn push(&mut self, column: &Column, row: usize) {
        if !column.validity.is_valid(row) {
            self.bytes.push(TAG_NULL);
            self.has_null = true;
            return;
        }
        let integer = |bytes: &mut SmallVec<[u8; 32]>, v: i64| {
            bytes.push(TAG_INTEGER);
            bytes.extend_from_slice(&v.to_le_bytes());
        };
        let float = |bytes: &mut SmallVec<[u8; 32]>, v: f64| {
            // -0.0 and 0.0 are the same key.
            let v = if v == 0.0 { 0.0 } else { v };
            bytes.push(TAG_FLOAT);
            bytes.extend_from_slice(&v.to_bits().to_le_bytes());
        };
        match &column.data {
            ColumnData::Int8(v) => integer(&mut self.bytes, i64::from(v[row])),
            ColumnData::Int16(v) => integer(&mut self.bytes, i64::from(v[row])),
            ColumnData::Int32(v) => integer(&mut self.bytes, i64::from(v[row])),
            ColumnData::Int64(v) => integer(&mut self.bytes, v[row]),
            ColumnData::Float32(v) => float(&mut self.bytes, f64::from(v[row])),
            ColumnData::Float64(v) => float(&mut self.bytes, v[row]),
            ColumnData::Text { .. } | ColumnData::Binary { .. } => {
                let tag = if matches!(column.data, ColumnData::Text { .. }) {
                    TAG_TEXT
                } else {
                    TAG_BINARY
                };
                let payload = column.data.varlen_bytes(row).unwrap_or_default();
                self.bytes.push(tag);
                self.bytes
                    .extend_from_slice(&(payload.len() as u64).to_le_bytes());
                self.bytes.extend_from_slice(payload);
            }
        }
    }

    /// True when any key component is NULL; such keys never match.
    #[must_use]
    pub const fn has_null(&self) -> bool {
        self.has_null
    }

    /// xxh3-64 over the whole tuple encoding.
    #[must_use]
    pub fn hash64(&self) -> u64 {
        xxh3_64(&self.bytes)
    }
}

/// Hash the key tuple of every row of `columns`.
///
/// All columns must have the same length; callers take them from one batch.
#[must_use]
pub fn hash_key_columns(columns: &[&Column], rows: usize) -> Vec<u64> {
    (0..rows)
        .map(|row| EncodedKey::encode(columns, row).hash64())
        .collect()
}
