//! Packed output rows.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::{PackError, Result};
use crate::fields::Token;
use crate::flatten::{unflatten, NestedExample};

/// Suffix of the flat key carrying a field's segment ids.
pub const SEGMENT_IDS_SUFFIX: &str = "_segment_ids";
/// Suffix of the flat key carrying a field's positions.
pub const POSITIONS_SUFFIX: &str = "_positions";

/// One field of a packed row. All three vectors have the field's capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedField {
    /// Concatenated tokens, zero-padded.
    pub values: Vec<Token>,
    /// 1-based index of the source example within the row; 0 marks padding.
    pub segment_ids: Vec<Token>,
    /// Offset of each token within its source example; 0 for padding.
    pub positions: Vec<Token>,
}

impl PackedField {
    /// Slot count (the field's capacity).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether this field has zero capacity.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of non-padding tokens.
    pub fn num_tokens(&self) -> usize {
        self.segment_ids.iter().filter(|&&s| s != 0).count()
    }

    /// Tokens belonging to segment `segment_id`.
    pub fn segment(&self, segment_id: Token) -> Vec<Token> {
        self.values
            .iter()
            .zip(&self.segment_ids)
            .filter(|(_, s)| **s == segment_id)
            .map(|(&v, _)| v)
            .collect()
    }
}

/// A completed fixed-length row emitted by the packer.
///
/// Holds one [`PackedField`] for every field declared in the
/// [`FieldSpec`](crate::fields::FieldSpec), even fields no packed example
/// touched (those are all padding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRow {
    pub(crate) fields: BTreeMap<String, PackedField>,
    pub(crate) num_examples: usize,
}

impl PackedRow {
    /// Packed data for `field`.
    pub fn field(&self, field: &str) -> Option<&PackedField> {
        self.fields.get(field)
    }

    /// All fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &PackedField)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of source examples packed into this row.
    pub fn num_examples(&self) -> usize {
        self.num_examples
    }

    /// Non-padding tokens / total slots, across all fields.
    pub fn fill_ratio(&self) -> f32 {
        let capacity: usize = self.fields.values().map(|f| f.len()).sum();
        if capacity == 0 {
            return 0.0;
        }
        let used: usize = self.fields.values().map(|f| f.num_tokens()).sum();
        used as f32 / capacity as f32
    }

    /// Flat feature map: `f`, `f_segment_ids` and `f_positions` per field.
    ///
    /// Fails with [`PackError::KeyConflict`] when an output key is taken twice,
    /// e.g. fields `a` and `a_positions`.
    pub fn into_flat(self) -> Result<BTreeMap<String, Vec<Token>>> {
        let mut flat = BTreeMap::new();
        for (name, field) in self.fields {
            insert_unique(&mut flat, format!("{}{}", name, SEGMENT_IDS_SUFFIX), field.segment_ids)?;
            insert_unique(&mut flat, format!("{}{}", name, POSITIONS_SUFFIX), field.positions)?;
            insert_unique(&mut flat, name, field.values)?;
        }
        Ok(flat)
    }

    /// Flat feature map with nested keys restored.
    ///
    /// For a field `a<|sep|>b` the outputs land at `a → {b, b_segment_ids, b_positions}`.
    pub fn unflatten(self) -> Result<NestedExample> {
        unflatten(self.into_flat()?)
    }
}

fn insert_unique(
    flat: &mut BTreeMap<String, Vec<Token>>,
    key: String,
    values: Vec<Token>,
) -> Result<()> {
    match flat.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(values);
            Ok(())
        }
        Entry::Occupied(slot) => Err(PackError::KeyConflict { key: slot.key().clone() }),
    }
}
