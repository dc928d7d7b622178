//! Packer configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};
use crate::fields::{FieldSpec, Truncation};
use crate::flatten::join_key;
use crate::multipack::DEFAULT_POOL_SIZE;

/// What the packer does with an example that has no tokens in any field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyExamplePolicy {
    /// Consume it and emit nothing.
    #[default]
    Skip,
    /// Fail with [`PackError::EmptyExample`].
    Reject,
}

/// Per-field lengths, possibly nested the same way as the examples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LengthTree {
    Length(usize),
    Nested(BTreeMap<String, LengthTree>),
}

/// Either one length for every key in `keys`, or an explicit per-field map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldLengths {
    Uniform(usize),
    PerField(BTreeMap<String, LengthTree>),
}

/// A field key: a plain name or a path into a nested example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldKey {
    Name(String),
    Path(Vec<String>),
}

impl FieldKey {
    /// Flat key as seen by the packer.
    pub fn flat(&self) -> String {
        match self {
            FieldKey::Name(name) => name.clone(),
            FieldKey::Path(path) => join_key(path.as_slice()),
        }
    }
}

impl From<&str> for FieldKey {
    fn from(name: &str) -> Self {
        FieldKey::Name(name.to_string())
    }
}

/// Configuration for a [`Packer`](crate::Packer).
///
/// ```json
/// {
///   "lengths": {"inputs": 512, "targets": {"ids": 128}},
///   "pool_size": 4,
///   "truncation": "keep_first",
///   "empty_examples": "skip"
/// }
/// ```
///
/// With a single integer length, `keys` names the fields it applies to:
/// `{"lengths": 256, "keys": ["inputs", ["targets", "ids"]]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackerConfig {
    /// Maximum packed length per field.
    pub lengths: FieldLengths,

    /// Fields a uniform length applies to. Ignored for per-field lengths.
    #[serde(default)]
    pub keys: Vec<FieldKey>,

    /// Number of bins kept open at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Which end of an over-long field is kept.
    #[serde(default)]
    pub truncation: Truncation,

    /// Handling of examples with no tokens.
    #[serde(default)]
    pub empty_examples: EmptyExamplePolicy,
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

impl PackerConfig {
    /// Config with default pool size, truncation and empty-example policy.
    pub fn new(lengths: FieldLengths, keys: Vec<FieldKey>) -> Self {
        Self {
            lengths,
            keys,
            pool_size: DEFAULT_POOL_SIZE,
            truncation: Truncation::default(),
            empty_examples: EmptyExamplePolicy::default(),
        }
    }

    /// One `length` for every key in `keys`.
    pub fn uniform<K: Into<FieldKey>>(length: usize, keys: impl IntoIterator<Item = K>) -> Self {
        Self::new(
            FieldLengths::Uniform(length),
            keys.into_iter().map(Into::into).collect(),
        )
    }

    /// Explicit flat `(field, length)` pairs.
    pub fn per_field<K: Into<String>>(lengths: impl IntoIterator<Item = (K, usize)>) -> Self {
        let map = lengths
            .into_iter()
            .map(|(k, v)| (k.into(), LengthTree::Length(v)))
            .collect();
        Self::new(FieldLengths::PerField(map), Vec::new())
    }

    /// Parse and validate a JSON config.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the pool size and that the lengths resolve to a valid [`FieldSpec`].
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PackError::InvalidConfig("pool_size must be > 0".into()));
        }
        self.field_spec().map(|_| ())
    }

    /// Resolve the lengths into a flat [`FieldSpec`].
    pub fn field_spec(&self) -> Result<FieldSpec> {
        match &self.lengths {
            FieldLengths::Uniform(length) => {
                if self.keys.is_empty() {
                    return Err(PackError::InvalidConfig(
                        "a single integer length requires `keys`".into(),
                    ));
                }
                FieldSpec::uniform(*length, self.keys.iter().map(FieldKey::flat))
            }
            FieldLengths::PerField(tree) => {
                let mut flat = Vec::new();
                let mut path = Vec::new();
                flatten_lengths(tree, &mut path, &mut flat);
                FieldSpec::new(flat)
            }
        }
    }
}

fn flatten_lengths<'a>(
    node: &'a BTreeMap<String, LengthTree>,
    path: &mut Vec<&'a str>,
    out: &mut Vec<(String, usize)>,
) {
    for (key, child) in node {
        path.push(key.as_str());
        match child {
            LengthTree::Length(length) => out.push((join_key(path.as_slice()), *length)),
            LengthTree::Nested(children) => flatten_lengths(children, path, out),
        }
        path.pop();
    }
}
