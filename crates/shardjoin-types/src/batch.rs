//! Columnar batch representation.
//!
//! A [`Batch`] is an ordered list of named, typed [`Column`]s of equal
//! length. Batches are immutable once built; every selection primitive
//! ([`Batch::take`], [`Batch::filter`], [`Batch::slice`], [`Batch::concat`])
//! materializes a new batch that keeps the source column order, names and
//! types.

use std::fmt;

use serde::{Deserialize, Serialize};
use shardjoin_error::{JoinError, Result};

use crate::value::Value;

// ── Column types ───────────────────────────────────────────────────────────

/// Physical storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnVectorType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Text,
    Binary,
}

impl ColumnVectorType {
    /// Equality family used when comparing join keys across sides.
    #[must_use]
    pub const fn key_family(self) -> KeyFamily {
        match self {
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 => KeyFamily::Integer,
            Self::Float32 | Self::Float64 => KeyFamily::Float,
            Self::Text => KeyFamily::Text,
            Self::Binary => KeyFamily::Binary,
        }
    }

    /// Stable label used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Text => "text",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for ColumnVectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key columns of two sides can be joined iff they share a family.
///
/// Integer widths are interchangeable (keys are widened to `i64` before
/// hashing), as are float widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Integer,
    Float,
    Text,
    Binary,
}

/// Name and type of one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub vector_type: ColumnVectorType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, vector_type: ColumnVectorType) -> Self {
        Self {
            name: name.into(),
            vector_type,
        }
    }
}

// ── Validity bitmap ────────────────────────────────────────────────────────

/// Packed validity bitmap; a set bit means the row is non-NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NullBitmap {
    bits: Vec<u8>,
    len: usize,
}

impl NullBitmap {
    /// Bitmap of `len` valid rows.
    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let mut bits = vec![0xFF_u8; len.div_ceil(8)];
        if len % 8 != 0
            && let Some(last) = bits.last_mut()
        {
            *last = (1_u8 << (len % 8)) - 1;
        }
        Self { bits, len }
    }

    /// Bitmap of `len` NULL rows.
    #[must_use]
    pub fn all_null(len: usize) -> Self {
        Self {
            bits: vec![0_u8; len.div_ceil(8)],
            len,
        }
    }

    pub fn from_validity<I: IntoIterator<Item = bool>>(validity: I) -> Self {
        let mut bitmap = Self::default();
        for valid in validity {
            bitmap.push(valid);
        }
        bitmap
    }

    pub fn push(&mut self, valid: bool) {
        if self.len % 8 == 0 {
            self.bits.push(0);
        }
        if valid {
            let last = self.bits.len() - 1;
            self.bits[last] |= 1_u8 << (self.len % 8);
        }
        self.len += 1;
    }

    /// Rows past the end are reported as NULL.
    #[must_use]
    pub fn is_valid(&self, row: usize) -> bool {
        row < self.len && self.bits[row / 8] & (1_u8 << (row % 8)) != 0
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn null_count(&self) -> usize {
        (0..self.len).filter(|&row| !self.is_valid(row)).count()
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bits.len()
    }
}

// ── Column data ────────────────────────────────────────────────────────────

/// Typed column storage. Variable-length columns use an offsets array with
/// `len + 1` entries into a contiguous byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Text { offsets: Vec<u32>, data: Vec<u8> },
    Binary { offsets: Vec<u32>, data: Vec<u8> },
}

impl ColumnData {
    #[must_use]
    pub fn empty(vector_type: ColumnVectorType) -> Self {
        match vector_type {
            ColumnVectorType::Int8 => Self::Int8(Vec::new()),
            ColumnVectorType::Int16 => Self::Int16(Vec::new()),
            ColumnVectorType::Int32 => Self::Int32(Vec::new()),
            ColumnVectorType::Int64 => Self::Int64(Vec::new()),
            ColumnVectorType::Float32 => Self::Float32(Vec::new()),
            ColumnVectorType::Float64 => Self::Float64(Vec::new()),
            ColumnVectorType::Text => Self::Text {
                offsets: vec![0],
                data: Vec::new(),
            },
            ColumnVectorType::Binary => Self::Binary {
                offsets: vec![0],
                data: Vec::new(),
            },
        }
    }

    #[must_use]
    pub const fn vector_type(&self) -> ColumnVectorType {
        match self {
            Self::Int8(_) => ColumnVectorType::Int8,
            Self::Int16(_) => ColumnVectorType::Int16,
            Self::Int32(_) => ColumnVectorType::Int32,
            Self::Int64(_) => ColumnVectorType::Int64,
            Self::Float32(_) => ColumnVectorType::Float32,
            Self::Float64(_) => ColumnVectorType::Float64,
            Self::Text { .. } => ColumnVectorType::Text,
            Self::Binary { .. } => ColumnVectorType::Binary,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Text { offsets, .. } | Self::Binary { offsets, .. } => {
                offsets.len().saturating_sub(1)
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Heap bytes held by the values (offsets included for varlen columns).
    #[must_use]
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len() * 2,
            Self::Int32(v) => v.len() * 4,
            Self::Float32(v) => v.len() * 4,
            Self::Int64(v) => v.len() * 8,
            Self::Float64(v) => v.len() * 8,
            Self::Text { offsets, data } | Self::Binary { offsets, data } => {
                offsets.len() * 4 + data.len()
            }
        }
    }

    /// Byte range of a varlen row, or `None` for fixed-width columns and
    /// out-of-range rows.
    #[must_use]
    pub fn varlen_bytes(&self, row: usize) -> Option<&[u8]> {
        let (Self::Text { offsets, data } | Self::Binary { offsets, data }) = self else {
            return None;
        };
        let start = *offsets.get(row)? as usize;
        let end = *offsets.get(row + 1)? as usize;
        data.get(start..end)
    }

    /// Gather rows by index; `None` produces a default placeholder that the
    /// caller marks NULL in the validity bitmap.
    fn gather(&self, indices: &[Option<usize>]) -> Result<Self> {
        fn fixed<T: Copy + Default>(src: &[T], indices: &[Option<usize>]) -> Vec<T> {
            indices
                .iter()
                .map(|idx| idx.and_then(|row| src.get(row).copied()).unwrap_or_default())
                .collect()
        }

        Ok(match self {
            Self::Int8(v) => Self::Int8(fixed(v, indices)),
            Self::Int16(v) => Self::Int16(fixed(v, indices)),
            Self::Int32(v) => Self::Int32(fixed(v, indices)),
            Self::Int64(v) => Self::Int64(fixed(v, indices)),
            Self::Float32(v) => Self::Float32(fixed(v, indices)),
            Self::Float64(v) => Self::Float64(fixed(v, indices)),
            Self::Text { .. } => {
                let (offsets, data) = self.gather_varlen(indices)?;
                Self::Text { offsets, data }
            }
            Self::Binary { .. } => {
                let (offsets, data) = self.gather_varlen(indices)?;
                Self::Binary { offsets, data }
            }
        })
    }

    fn gather_varlen(&self, indices: &[Option<usize>]) -> Result<(Vec<u32>, Vec<u8>)> {
        let mut offsets = Vec::with_capacity(indices.len() + 1);
        let mut data = Vec::new();
        offsets.push(0);
        for idx in indices {
            if let Some(bytes) = idx.and_then(|row| self.varlen_bytes(row)) {
                data.extend_from_slice(bytes);
            }
            offsets.push(offset_u32(data.len())?);
        }
        Ok((offsets, data))
    }

    fn extend_from(&mut self, other: &Self) -> Result<()> {
        match (self, other) {
            (Self::Int8(dst), Self::Int8(src)) => dst.extend_from_slice(src),
            (Self::Int16(dst), Self::Int16(src)) => dst.extend_from_slice(src),
            (Self::Int32(dst), Self::Int32(src)) => dst.extend_from_slice(src),
            (Self::Int64(dst), Self::Int64(src)) => dst.extend_from_slice(src),
            (Self::Float32(dst), Self::Float32(src)) => dst.extend_from_slice(src),
            (Self::Float64(dst), Self::Float64(src)) => dst.extend_from_slice(src),
            (
                Self::Text {
                    offsets: dst_offsets,
                    data: dst_data,
                },
                Self::Text {
                    offsets: src_offsets,
                    data: src_data,
                },
            )
            | (
                Self::Binary {
                    offsets: dst_offsets,
                    data: dst_data,
                },
                Self::Binary {
                    offsets: src_offsets,
                    data: src_data,
                },
            ) => {
                let base = offset_u32(dst_data.len())?;
                dst_data.extend_from_slice(src_data);
                for &offset in src_offsets.iter().skip(1) {
                    let rebased = base.checked_add(offset).ok_or_else(|| {
                        JoinError::batch("varlen column exceeds u32 offset range")
                    })?;
                    dst_offsets.push(rebased);
                }
            }
            (dst, src) => {
                return Err(JoinError::batch(format!(
                    "cannot append {} column to {} column",
                    src.vector_type(),
                    dst.vector_type()
                )));
            }
        }
        Ok(())
    }
}

fn offset_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| JoinError::batch("varlen column exceeds u32 offset range"))
}

// ── Column ─────────────────────────────────────────────────────────────────

/// A named, typed column with its validity bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub spec: ColumnSpec,
    pub data: ColumnData,
    pub validity: NullBitmap,
}

impl Column {
    /// # Errors
    ///
    /// Fails when the data type disagrees with `spec` or the validity bitmap
    /// length differs from the data length.
    pub fn new(spec: ColumnSpec, data: ColumnData, validity: NullBitmap) -> Result<Self> {
        if data.vector_type() != spec.vector_type {
            return Err(JoinError::batch(format!(
                "column {} declared {} but holds {} data",
                spec.name,
                spec.vector_type,
                data.vector_type()
            )));
        }
        if data.len() != validity.len() {
            return Err(JoinError::batch(format!(
                "column {} has {} values but {} validity bits",
                spec.name,
                data.len(),
                validity.len()
            )));
        }
        Ok(Self {
            spec,
            data,
            validity,
        })
    }

    /// A column of `len` NULLs.
    pub fn nulls(spec: ColumnSpec, len: usize) -> Result<Self> {
        let indices = vec![None; len];
        let data = ColumnData::empty(spec.vector_type).gather(&indices)?;
        Self::new(spec, data, NullBitmap::all_null(len))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.data.byte_size() + self.validity.byte_size()
    }

    /// Value at `row`; out-of-range rows read as NULL.
    #[must_use]
    pub fn value_at(&self, row: usize) -> Value {
        if !self.validity.is_valid(row) {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Int8(v) => v.get(row).map_or(Value::Null, |&x| Value::Integer(i64::from(x))),
            ColumnData::Int16(v) => v.get(row).map_or(Value::Null, |&x| Value::Integer(i64::from(x))),
            ColumnData::Int32(v) => v.get(row).map_or(Value::Null, |&x| Value::Integer(i64::from(x))),
            ColumnData::Int64(v) => v.get(row).map_or(Value::Null, |&x| Value::Integer(x)),
            ColumnData::Float32(v) => v.get(row).map_or(Value::Null, |&x| Value::Float(f64::from(x))),
            ColumnData::Float64(v) => v.get(row).map_or(Value::Null, |&x| Value::Float(x)),
            ColumnData::Text { .. } => self.data.varlen_bytes(row).map_or(Value::Null, |bytes| {
                Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }),
            ColumnData::Binary { .. } => self
                .data
                .varlen_bytes(row)
                .map_or(Value::Null, |bytes| Value::Blob(bytes.to_vec())),
        }
    }

    /// Gather rows by optional index; `None` entries become NULL.
    ///
    /// # Errors
    ///
    /// Fails when an index is out of range.
    pub fn gather(&self, indices: &[Option<usize>]) -> Result<Self> {
        if let Some(bad) = indices.iter().flatten().find(|&&row| row >= self.len()) {
            return Err(JoinError::batch(format!(
                "row index {bad} out of bounds for column {} with {} rows",
                self.spec.name,
                self.len()
            )));
        }
        let data = self.data.gather(indices)?;
        let validity = NullBitmap::from_validity(
            indices
                .iter()
                .map(|idx| idx.is_some_and(|row| self.validity.is_valid(row))),
        );
        Self::new(self.spec.clone(), data, validity)
    }

    /// Gather `(source, row)` references drawn from several columns into one
    /// column typed by `spec`. `None` entries become NULL. Values convert
    /// across widths of the same scalar kind.
    ///
    /// # Errors
    ///
    /// Fails on an out-of-range source or a value that does not fit `spec`.
    pub fn gather_many(
        spec: &ColumnSpec,
        sources: &[&Self],
        refs: &[Option<(usize, usize)>],
    ) -> Result<Self> {
        let mut builder = ColumnBuilder::new(spec);
        for entry in refs {
            let value = match *entry {
                None => Value::Null,
                Some((source, row)) => {
                    let column = sources.get(source).ok_or_else(|| {
                        JoinError::batch(format!("gather source {source} out of bounds"))
                    })?;
                    column.value_at(row)
                }
            };
            builder.push(&value)?;
        }
        builder.finish()
    }
}

// ── Column builder ─────────────────────────────────────────────────────────

/// Appends row values into typed storage, converting across compatible
/// scalar kinds.
struct ColumnBuilder {
    spec: ColumnSpec,
    data: ColumnData,
    validity: NullBitmap,
}

impl ColumnBuilder {
    fn new(spec: &ColumnSpec) -> Self {
        Self {
            spec: spec.clone(),
            data: ColumnData::empty(spec.vector_type),
            validity: NullBitmap::default(),
        }
    }

    fn push(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            self.validity.push(false);
            return self.push_default();
        }
        let mismatch = || {
            JoinError::batch(format!(
                "value {value} does not fit column {} of type {}",
                self.spec.name, self.spec.vector_type
            ))
        };
        match (&mut self.data, value) {
            (ColumnData::Int8(v), Value::Integer(x)) => {
                v.push(i8::try_from(*x).map_err(|_| mismatch())?);
            }
            (ColumnData::Int16(v), Value::Integer(x)) => {
                v.push(i16::try_from(*x).map_err(|_| mismatch())?);
            }
            (ColumnData::Int32(v), Value::Integer(x)) => {
                v.push(i32::try_from(*x).map_err(|_| mismatch())?);
            }
            (ColumnData::Int64(v), Value::Integer(x)) => v.push(*x),
            (ColumnData::Float32(v), Value::Float(x)) => v.push(*x as f32),
            (ColumnData::Float32(v), Value::Integer(x)) => v.push(*x as f32),
            (ColumnData::Float64(v), Value::Float(x)) => v.push(*x),
            (ColumnData::Float64(v), Value::Integer(x)) => v.push(*x as f64),
            (ColumnData::Text { offsets, data }, Value::Text(s)) => {
                data.extend_from_slice(s.as_bytes());
                offsets.push(offset_u32(data.len())?);
            }
            (ColumnData::Binary { offsets, data }, Value::Blob(b)) => {
                data.extend_from_slice(b);
                offsets.push(offset_u32(data.len())?);
            }
            _ => return Err(mismatch()),
        }
        self.validity.push(true);
        Ok(())
    }

    fn push_default(&mut self) -> Result<()> {
        match &mut self.data {
            ColumnData::Int8(v) => v.push(0),
            ColumnData::Int16(v) => v.push(0),
            ColumnData::Int32(v) => v.push(0),
            ColumnData::Int64(v) => v.push(0),
            ColumnData::Float32(v) => v.push(0.0),
            ColumnData::Float64(v) => v.push(0.0),
            ColumnData::Text { offsets, data } | ColumnData::Binary { offsets, data } => {
                offsets.push(offset_u32(data.len())?);
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<Column> {
        Column::new(self.spec, self.data, self.validity)
    }
}

// ── Batch ──────────────────────────────────────────────────────────────────

/// An ordered set of equal-length columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    columns: Vec<Column>,
    row_count: usize,
}

impl Batch {
    /// # Errors
    ///
    /// Fails when the columns have different lengths.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let row_count = columns.first().map_or(0, Column::len);
        if let Some(bad) = columns.iter().find(|c| c.len() != row_count) {
            return Err(JoinError::batch(format!(
                "column {} has {} rows, expected {row_count}",
                bad.spec.name,
                bad.len()
            )));
        }
        Ok(Self { columns, row_count })
    }

    /// Zero-row batch with the given schema.
    #[must_use]
    pub fn empty(specs: &[ColumnSpec]) -> Self {
        let columns = specs
            .iter()
            .map(|spec| Column {
                spec: spec.clone(),
                data: ColumnData::empty(spec.vector_type),
                validity: NullBitmap::default(),
            })
            .collect();
        Self {
            columns,
            row_count: 0,
        }
    }

    /// Build a batch from row-oriented values.
    ///
    /// # Errors
    ///
    /// Fails when a row has the wrong arity or a value does not fit its
    /// column type.
    pub fn from_rows(rows: &[Vec<Value>], specs: &[ColumnSpec]) -> Result<Self> {
        let mut builders: Vec<ColumnBuilder> = specs.iter().map(ColumnBuilder::new).collect();
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != specs.len() {
                return Err(JoinError::batch(format!(
                    "row {row_idx} has {} values, schema has {} columns",
                    row.len(),
                    specs.len()
                )));
            }
            for (builder, value) in builders.iter_mut().zip(row) {
                builder.push(value)?;
            }
        }
        let columns = builders
            .into_iter()
            .map(ColumnBuilder::finish)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            columns,
            row_count: rows.len(),
        })
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.spec.name == name)
    }

    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.column_index(name).and_then(|idx| self.columns.get(idx))
    }

    #[must_use]
    pub fn schema(&self) -> Vec<ColumnSpec> {
        self.columns.iter().map(|c| c.spec.clone()).collect()
    }

    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(Column::byte_size).sum()
    }

    /// One row as values, in column order.
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.value_at(row)).collect()
    }

    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.row_count).map(|row| self.row(row)).collect()
    }

    /// Select rows by index, in the order given.
    ///
    /// # Errors
    ///
    /// Fails when an index is out of range.
    pub fn take(&self, indices: &[usize]) -> Result<Self> {
        let indices: Vec<Option<usize>> = indices.iter().copied().map(Some).collect();
        let columns = self
            .columns
            .iter()
            .map(|c| c.gather(&indices))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            columns,
            row_count: indices.len(),
        })
    }

    /// Rows `[offset, offset + len)`, clamped to the batch.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self> {
        let start = offset.min(self.row_count);
        let end = offset.saturating_add(len).min(self.row_count);
        let indices: Vec<usize> = (start..end).collect();
        self.take(&indices)
    }

    /// Concatenate batches of identical schema, preserving their order.
    ///
    /// # Errors
    ///
    /// Fails on an empty input list or when schemas differ.
    pub fn concat(parts: &[Self]) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(JoinError::batch("cannot concatenate zero batches"));
        };
        let schema = first.schema();
        let mut columns: Vec<Column> = Self::empty(&schema).columns;
        let mut row_count = 0_usize;
        for part in parts {
            if part.columns.len() != schema.len() {
                return Err(JoinError::batch(format!(
                    "batch has {} columns, expected {}",
                    part.columns.len(),
                    schema.len()
                )));
            }
            for (dst, src) in columns.iter_mut().zip(&part.columns) {
                if dst.spec != src.spec {
                    return Err(JoinError::batch(format!(
                        "column {}:{} does not match {}:{}",
                        src.spec.name, src.spec.vector_type, dst.spec.name, dst.spec.vector_type
                    )));
                }
                if src.is_empty() {
                    continue;
                }
                dst.data.extend_from(&src.data)?;
                for row in 0..src.len() {
                    dst.validity.push(src.validity.is_valid(row));
                }
            }
            row_count += part.row_count;
        }
        Ok(Self { columns, row_count })
    }
}
