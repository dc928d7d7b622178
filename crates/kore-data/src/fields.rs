//! Field capacities and the example representation fed to the packer.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};

/// Token ID type. Zero is reserved for padding in packed output.
pub type Token = i32;

/// One flat training example: field name → token sequence.
///
/// Nested examples are flattened into this shape with [`crate::flatten::flatten`].
pub type Example = BTreeMap<String, Vec<Token>>;

/// Which end of an over-long field survives truncation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Keep the first `capacity` tokens.
    #[default]
    KeepFirst,
    /// Keep the last `capacity` tokens.
    KeepLast,
}

impl Truncation {
    /// Cut `tokens` down to at most `capacity` tokens.
    pub fn apply<'a>(&self, tokens: &'a [Token], capacity: usize) -> &'a [Token] {
        if tokens.len() <= capacity {
            return tokens;
        }
        match self {
            Truncation::KeepFirst => &tokens[..capacity],
            Truncation::KeepLast => &tokens[tokens.len() - capacity..],
        }
    }
}

/// Maximum packed length for every field the packer accepts.
///
/// Immutable once built; every emitted row has exactly `capacity(f)` slots
/// per field `f`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    lengths: BTreeMap<String, usize>,
}

impl FieldSpec {
    /// Build from explicit `(field, max_length)` pairs.
    ///
    /// Fails if no field is given, a field is repeated, or any length is zero.
    pub fn new<K, I>(lengths: I) -> Result<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, usize)>,
    {
        let mut map: BTreeMap<String, usize> = BTreeMap::new();
        for (field, len) in lengths {
            match map.entry(field.into()) {
                Entry::Vacant(slot) => {
                    slot.insert(len);
                }
                Entry::Occupied(slot) => {
                    return Err(PackError::InvalidConfig(format!(
                        "field '{}' is declared more than once",
                        slot.key()
                    )));
                }
            }
        }
        let lengths = map;

        if lengths.is_empty() {
            return Err(PackError::InvalidConfig("field spec declares no fields".into()));
        }
        if let Some((field, _)) = lengths.iter().find(|(_, len)| **len == 0) {
            return Err(PackError::InvalidConfig(format!(
                "field '{}' has zero max length",
                field
            )));
        }

        Ok(Self { lengths })
    }

    /// Apply a single `length` to every key in `keys`.
    pub fn uniform<K, I>(length: usize, keys: I) -> Result<Self>
    where
        K: Into<String>,
        I: IntoIterator<Item = K>,
    {
        Self::new(keys.into_iter().map(|k| (k, length)))
    }

    /// Capacity of `field`, or `None` if it is not declared.
    pub fn capacity(&self, field: &str) -> Option<usize> {
        self.lengths.get(field).copied()
    }

    /// Declared fields and their capacities, in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, usize)> {
        self.lengths.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Whether no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}
