//! Core data types for the sharded concurrent hash join.
//!
//! - [`batch`]: columnar [`Batch`] and its selection primitives.
//! - [`key`]: canonical key-tuple encoding and hashing.
//! - [`join`]: [`JoinKind`], [`JoinStrictness`], [`TableJoin`].
//! - [`limits`] and [`settings`]: size limits and TOML-loadable settings.

pub mod batch;
pub mod join;
pub mod key;
pub mod limits;
pub mod settings;
pub mod value;

pub use batch::{Batch, Column, ColumnData, ColumnSpec, ColumnVectorType, KeyFamily, NullBitmap};
pub use join::{JoinKind, JoinStrictness, TableJoin};
pub use key::{EncodedKey, hash_key_columns};
pub use limits::{OverflowMode, SizeLimits};
pub use settings::JoinSettings;
pub use value::Value;
