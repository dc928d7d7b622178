//! Nested feature trees ↔ flat field maps.
//!
//! The packer works on flat `field → tokens` maps. Nested examples such as
//! `{"text": {"ids": [..]}}` are flattened by joining key paths with
//! [`FLATTEN_SEPARATOR`], and packed rows are unflattened the same way.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};
use crate::fields::{Example, Token};

/// Separator placed between the components of a nested key.
pub const FLATTEN_SEPARATOR: &str = "<|sep|>";

/// A node in a nested example: either a token sequence or a map of children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Feature {
    Tokens(Vec<Token>),
    Map(BTreeMap<String, Feature>),
}

/// Example with arbitrarily nested feature keys.
pub type NestedExample = BTreeMap<String, Feature>;

/// Join a key path into one flat key.
pub fn join_key<S: AsRef<str>>(path: &[S]) -> String {
    path.iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(FLATTEN_SEPARATOR)
}

/// Split a flat key back into its path components.
pub fn split_key(key: &str) -> impl Iterator<Item = &str> {
    key.split(FLATTEN_SEPARATOR)
}

/// Flatten a nested example into the flat form the packer consumes.
pub fn flatten(nested: &NestedExample) -> Example {
    let mut flat = Example::new();
    let mut path = Vec::new();
    flatten_into(nested, &mut path, &mut flat);
    flat
}

fn flatten_into<'a>(
    node: &'a BTreeMap<String, Feature>,
    path: &mut Vec<&'a str>,
    out: &mut Example,
) {
    for (key, feature) in node {
        path.push(key.as_str());
        match feature {
            Feature::Tokens(tokens) => {
                out.insert(join_key(path.as_slice()), tokens.clone());
            }
            Feature::Map(children) => flatten_into(children, path, out),
        }
        path.pop();
    }
}

/// Rebuild a nested example from flat keys.
///
/// Fails with [`PackError::KeyConflict`] when one key is both a leaf and the
/// prefix of another key (e.g. `a` and `a<|sep|>b`).
pub fn unflatten(flat: BTreeMap<String, Vec<Token>>) -> Result<NestedExample> {
    let mut root = NestedExample::new();
    for (key, tokens) in flat {
        let parts: Vec<&str> = split_key(&key).collect();
        insert_path(&mut root, &parts, tokens, &key)?;
    }
    Ok(root)
}

fn insert_path(
    node: &mut BTreeMap<String, Feature>,
    parts: &[&str],
    tokens: Vec<Token>,
    key: &str,
) -> Result<()> {
    let Some((head, rest)) = parts.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        return match node.entry(head.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(Feature::Tokens(tokens));
                Ok(())
            }
            Entry::Occupied(_) => Err(PackError::KeyConflict { key: key.to_string() }),
        };
    }

    let child = node
        .entry(head.to_string())
        .or_insert_with(|| Feature::Map(BTreeMap::new()));
    match child {
        Feature::Map(children) => insert_path(children, rest, tokens, key),
        Feature::Tokens(_) => Err(PackError::KeyConflict { key: key.to_string() }),
    }
}
