//! # kore-data
//!
//! Sequence packing for Kore training pipelines.
//!
//! Provides:
//! - `Packer` — streaming first-fit packing of multi-field examples into fixed-length rows
//! - `PackedRow` — padded values plus per-token segment ids and positions
//! - `PackedStream` / `pack_shards` — drive a packer from an iterator, or many in parallel
//! - `flatten` — nested feature keys ↔ flat field names

pub mod config;
pub mod error;
pub mod fields;
pub mod flatten;
pub mod multipack;
pub mod row;
pub mod stream;

pub use config::{EmptyExamplePolicy, FieldKey, FieldLengths, LengthTree, PackerConfig};
pub use error::{PackError, Result};
pub use fields::{Example, FieldSpec, Token, Truncation};
pub use flatten::{flatten, unflatten, Feature, NestedExample, FLATTEN_SEPARATOR};
pub use multipack::{Packer, PackerStats, DEFAULT_POOL_SIZE};
pub use row::{PackedField, PackedRow};
pub use stream::{pack_examples, pack_shards, PackedStream};
