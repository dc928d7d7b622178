//! Packer — stream variable-length multi-field examples into fixed-length rows.
//!
//! Instead of padding every example to the field capacity, several short
//! examples are concatenated into one row per field. Each token carries its
//! provenance: a segment id (which example in the row it came from, 1-based,
//! 0 for padding) and a position (offset within that example).
//!
//! # Algorithm
//! 1. Truncate each field of the incoming example to its capacity
//! 2. Scan open bins oldest-first and place the example into the first bin
//!    with room in every field it touches (first-fit)
//! 3. If nothing fits, open a new bin; if the pool is already full, evict the
//!    oldest bin as a padded [`PackedRow`] first
//! 4. On [`Packer::drain`], emit every open bin oldest-first
//!
//! Examples are never split across bins, and for a given input order and
//! pool size the output is fully deterministic.

use std::collections::{BTreeMap, VecDeque};

use crate::config::{EmptyExamplePolicy, PackerConfig};
use crate::error::{PackError, Result};
use crate::fields::{Example, FieldSpec, Token, Truncation};
use crate::row::{PackedField, PackedRow};

/// Default number of bins kept open at once.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// One field of a bin under construction.
#[derive(Debug)]
struct FieldBuffer {
    capacity: usize,
    values: Vec<Token>,
    segment_ids: Vec<Token>,
    positions: Vec<Token>,
}

impl FieldBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: Vec::with_capacity(capacity),
            segment_ids: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
        }
    }

    fn remaining(&self) -> usize {
        self.capacity - self.values.len()
    }

    fn push(&mut self, tokens: &[Token], segment_id: Token) {
        self.values.extend_from_slice(tokens);
        self.segment_ids
            .extend(std::iter::repeat(segment_id).take(tokens.len()));
        self.positions.extend((0..tokens.len()).map(|p| p as Token));
    }

    fn into_packed(mut self) -> PackedField {
        self.values.resize(self.capacity, 0);
        self.segment_ids.resize(self.capacity, 0);
        self.positions.resize(self.capacity, 0);
        PackedField {
            values: self.values,
            segment_ids: self.segment_ids,
            positions: self.positions,
        }
    }
}

/// A packed row under construction. Holds a buffer for every declared field.
#[derive(Debug)]
struct Bin {
    fields: BTreeMap<String, FieldBuffer>,
    next_segment_id: Token,
    example_count: usize,
}

impl Bin {
    fn new(spec: &FieldSpec) -> Self {
        Self {
            fields: spec
                .fields()
                .map(|(name, cap)| (name.to_string(), FieldBuffer::new(cap)))
                .collect(),
            next_segment_id: 1,
            example_count: 0,
        }
    }

    /// Whether every field of `placement` fits in the remaining capacity.
    fn fits(&self, placement: &[(&str, &[Token])]) -> bool {
        placement.iter().all(|(name, tokens)| {
            self.fields
                .get(*name)
                .is_some_and(|buf| tokens.len() <= buf.remaining())
        })
    }

    /// Append `placement` as the next segment. Caller checks [`Bin::fits`] first.
    fn add(&mut self, placement: &[(&str, &[Token])]) {
        let segment_id = self.next_segment_id;
        for (name, tokens) in placement {
            if let Some(buf) = self.fields.get_mut(*name) {
                buf.push(tokens, segment_id);
            }
        }
        self.next_segment_id += 1;
        self.example_count += 1;
    }

    fn into_row(self) -> PackedRow {
        PackedRow {
            fields: self
                .fields
                .into_iter()
                .map(|(name, buf)| (name, buf.into_packed()))
                .collect(),
            num_examples: self.example_count,
        }
    }
}

/// Counters describing what a [`Packer`] has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackerStats {
    /// Examples placed into a bin.
    pub examples_packed: usize,
    /// Empty examples dropped under [`EmptyExamplePolicy::Skip`].
    pub examples_skipped: usize,
    /// Packed examples with at least one truncated field.
    pub examples_truncated: usize,
    /// Rows emitted by eviction or drain.
    pub rows_emitted: usize,
    /// Rows emitted because the pool was full.
    pub evictions: usize,
}

/// Streaming first-fit bin packer over a bounded pool of open bins.
///
/// Feed examples one at a time with [`submit`](Packer::submit), forward the
/// rows it returns, and call [`drain`](Packer::drain) once at end of stream
/// to flush the partially filled bins.
///
/// # Example
/// ```
/// use kore_data::{Example, FieldSpec, Packer};
///
/// let spec = FieldSpec::uniform(10, ["inputs", "targets"]).unwrap();
/// let mut packer = Packer::new(spec, 2).unwrap();
///
/// let mut ex = Example::new();
/// ex.insert("inputs".into(), vec![8, 7, 1]);
/// ex.insert("targets".into(), vec![4, 1]);
/// assert!(packer.submit(&ex).unwrap().is_empty());
///
/// let rows = packer.drain();
/// assert_eq!(rows.len(), 1);
/// assert_eq!(rows[0].field("inputs").unwrap().values, vec![8, 7, 1, 0, 0, 0, 0, 0, 0, 0]);
/// ```
#[derive(Debug)]
pub struct Packer {
    spec: FieldSpec,
    pool_size: usize,
    truncation: Truncation,
    empty_examples: EmptyExamplePolicy,
    /// Open bins, oldest first.
    bins: VecDeque<Bin>,
    closed: bool,
    stats: PackerStats,
}

impl Packer {
    /// Create a packer keeping at most `pool_size` bins open.
    pub fn new(spec: FieldSpec, pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(PackError::InvalidConfig("pool_size must be > 0".into()));
        }
        Ok(Self {
            spec,
            pool_size,
            truncation: Truncation::default(),
            empty_examples: EmptyExamplePolicy::default(),
            bins: VecDeque::with_capacity(pool_size),
            closed: false,
            stats: PackerStats::default(),
        })
    }

    /// Build a packer from a validated [`PackerConfig`].
    pub fn from_config(config: &PackerConfig) -> Result<Self> {
        Ok(Self::new(config.field_spec()?, config.pool_size)?
            .with_truncation(config.truncation)
            .with_empty_examples(config.empty_examples))
    }

    /// Set which end of over-long fields is kept.
    pub fn with_truncation(mut self, truncation: Truncation) -> Self {
        self.truncation = truncation;
        self
    }

    /// Set how examples with no tokens are handled.
    pub fn with_empty_examples(mut self, policy: EmptyExamplePolicy) -> Self {
        self.empty_examples = policy;
        self
    }

    /// Pack one example, returning any rows evicted to make room for it.
    ///
    /// Fields are validated and truncated before any bin is touched, so an
    /// error leaves the packer unchanged.
    pub fn submit(&mut self, example: &Example) -> Result<Vec<PackedRow>> {
        if self.closed {
            return Err(PackError::PackerClosed);
        }

        let mut placement: Vec<(&str, &[Token])> = Vec::with_capacity(example.len());
        let mut truncated = false;
        for (name, tokens) in example {
            let capacity = self
                .spec
                .capacity(name)
                .ok_or_else(|| PackError::FieldNotDeclared { field: name.clone() })?;
            let kept = self.truncation.apply(tokens, capacity);
            truncated |= kept.len() < tokens.len();
            placement.push((name.as_str(), kept));
        }

        if placement.iter().all(|(_, tokens)| tokens.is_empty()) {
            return match self.empty_examples {
                EmptyExamplePolicy::Skip => {
                    self.stats.examples_skipped += 1;
                    tracing::trace!("skipping empty example ({} fields)", example.len());
                    Ok(Vec::new())
                }
                EmptyExamplePolicy::Reject => Err(PackError::EmptyExample),
            };
        }

        let mut emitted = Vec::new();
        let slot = match self.bins.iter().position(|bin| bin.fits(&placement)) {
            Some(slot) => slot,
            None => {
                if self.bins.len() >= self.pool_size {
                    if let Some(oldest) = self.bins.pop_front() {
                        tracing::debug!(
                            "pool full ({} bins), evicting oldest bin with {} examples",
                            self.pool_size,
                            oldest.example_count,
                        );
                        self.stats.evictions += 1;
                        emitted.push(oldest.into_row());
                    }
                }
                self.bins.push_back(Bin::new(&self.spec));
                self.bins.len() - 1
            }
        };

        let bin = &mut self.bins[slot];
        bin.add(&placement);
        tracing::trace!("placed example as segment {} of bin {}", bin.next_segment_id - 1, slot);

        self.stats.examples_packed += 1;
        if truncated {
            self.stats.examples_truncated += 1;
        }
        self.stats.rows_emitted += emitted.len();
        Ok(emitted)
    }

    /// Emit every open bin oldest-first and close the packer.
    ///
    /// Further calls return an empty list; further [`submit`](Packer::submit)
    /// calls fail with [`PackError::PackerClosed`].
    pub fn drain(&mut self) -> Vec<PackedRow> {
        self.closed = true;
        let rows: Vec<PackedRow> = self.bins.drain(..).map(Bin::into_row).collect();
        if !rows.is_empty() {
            tracing::debug!("drained {} open bins", rows.len());
        }
        self.stats.rows_emitted += rows.len();
        rows
    }

    /// Field capacities this packer was built with.
    pub fn field_spec(&self) -> &FieldSpec {
        &self.spec
    }

    /// Maximum number of bins kept open.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of bins currently open.
    pub fn open_bins(&self) -> usize {
        self.bins.len()
    }

    /// Whether [`drain`](Packer::drain) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Counters accumulated since the packer was created.
    pub fn stats(&self) -> PackerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(fields: &[(&str, &[Token])]) -> Example {
        fields
            .iter()
            .map(|(name, tokens)| (name.to_string(), tokens.to_vec()))
            .collect()
    }

    fn inputs_targets(len: usize, pool_size: usize) -> Packer {
        let spec = FieldSpec::uniform(len, ["inputs", "targets"]).unwrap();
        Packer::new(spec, pool_size).unwrap()
    }

    #[test]
    fn test_two_examples_share_a_row() {
        let mut packer = inputs_targets(10, 4);
        let a = example(&[("inputs", &[8, 7, 1]), ("targets", &[4, 1])]);
        let b = example(&[("inputs", &[2, 3, 4, 1]), ("targets", &[5, 6, 1])]);

        assert!(packer.submit(&a).unwrap().is_empty());
        assert!(packer.submit(&b).unwrap().is_empty());
        assert_eq!(packer.open_bins(), 1);

        let rows = packer.drain();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].num_examples(), 2);

        let inputs = rows[0].field("inputs").unwrap();
        assert_eq!(inputs.values, vec![8, 7, 1, 2, 3, 4, 1, 0, 0, 0]);
        assert_eq!(inputs.segment_ids, vec![1, 1, 1, 2, 2, 2, 2, 0, 0, 0]);
        assert_eq!(inputs.positions, vec![0, 1, 2, 0, 1, 2, 3, 0, 0, 0]);

        let targets = rows[0].field("targets").unwrap();
        assert_eq!(targets.values, vec![4, 1, 5, 6, 1, 0, 0, 0, 0, 0]);
        assert_eq!(targets.segment_ids, vec![1, 1, 2, 2, 2, 0, 0, 0, 0, 0]);
        assert_eq!(targets.positions, vec![0, 1, 0, 1, 2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_first_fit_prefers_oldest_bin() {
        let spec = FieldSpec::new([("x", 5)]).unwrap();
        let mut packer = Packer::new(spec, 3).unwrap();

        packer.submit(&example(&[("x", &[1, 1, 1, 1])])).unwrap();
        packer.submit(&example(&[("x", &[2, 2, 2, 2])])).unwrap();
        // Fits in both open bins; must land in the older one.
        packer.submit(&example(&[("x", &[3])])).unwrap();

        let rows = packer.drain();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].field("x").unwrap().values, vec![1, 1, 1, 1, 3]);
        assert_eq!(rows[0].field("x").unwrap().segment_ids, vec![1, 1, 1, 1, 2]);
        assert_eq!(rows[1].field("x").unwrap().values, vec![2, 2, 2, 2, 0]);
    }

    #[test]
    fn test_full_pool_evicts_oldest() {
        let spec = FieldSpec::new([("x", 4)]).unwrap();
        let mut packer = Packer::new(spec, 2).unwrap();

        assert!(packer.submit(&example(&[("x", &[1, 1, 1])])).unwrap().is_empty());
        assert!(packer.submit(&example(&[("x", &[2, 2, 2])])).unwrap().is_empty());
        assert!(packer.submit(&example(&[("x", &[3])])).unwrap().is_empty());

        // Neither bin has room for two tokens and the pool is full.
        let evicted = packer.submit(&example(&[("x", &[4, 4])])).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].field("x").unwrap().values, vec![1, 1, 1, 3]);
        assert_eq!(evicted[0].field("x").unwrap().segment_ids, vec![1, 1, 1, 2]);
        assert_eq!(packer.open_bins(), 2);

        let rows = packer.drain();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].field("x").unwrap().values, vec![2, 2, 2, 0]);
        assert_eq!(rows[1].field("x").unwrap().values, vec![4, 4, 0, 0]);

        let stats = packer.stats();
        assert_eq!(stats.examples_packed, 4);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.rows_emitted, 3);
    }

    #[test]
    fn test_example_must_fit_every_field() {
        let spec = FieldSpec::new([("a", 4), ("b", 4)]).unwrap();
        let mut packer = Packer::new(spec, 1).unwrap();

        packer.submit(&example(&[("a", &[1]), ("b", &[1, 1, 1])])).unwrap();
        // `a` fits but `b` does not, so the first bin is evicted.
        let evicted = packer.submit(&example(&[("a", &[2]), ("b", &[2, 2])])).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].field("a").unwrap().values, vec![1, 0, 0, 0]);
        assert_eq!(evicted[0].field("b").unwrap().values, vec![1, 1, 1, 0]);
    }

    #[test]
    fn test_absent_field_is_padding() {
        let spec = FieldSpec::new([("a", 3), ("b", 3)]).unwrap();
        let mut packer = Packer::new(spec, 1).unwrap();

        packer.submit(&example(&[("a", &[5])])).unwrap();
        packer.submit(&example(&[("a", &[6]), ("b", &[7])])).unwrap();

        let rows = packer.drain();
        let b = rows[0].field("b").unwrap();
        // Segment ids track the example, so `b` starts at segment 2.
        assert_eq!(b.values, vec![7, 0, 0]);
        assert_eq!(b.segment_ids, vec![2, 0, 0]);
        assert_eq!(b.positions, vec![0, 0, 0]);
    }

    #[test]
    fn test_truncation_keeps_first_tokens() {
        let mut packer = inputs_targets(3, 2);
        packer
            .submit(&example(&[("inputs", &[1, 2, 3, 4, 5]), ("targets", &[9])]))
            .unwrap();

        let rows = packer.drain();
        assert_eq!(rows[0].field("inputs").unwrap().values, vec![1, 2, 3]);
        assert_eq!(rows[0].field("inputs").unwrap().positions, vec![0, 1, 2]);
        assert_eq!(packer.stats().examples_truncated, 1);
    }

    #[test]
    fn test_truncation_keep_last() {
        let mut packer = inputs_targets(3, 2).with_truncation(Truncation::KeepLast);
        packer.submit(&example(&[("inputs", &[1, 2, 3, 4, 5])])).unwrap();

        let rows = packer.drain();
        assert_eq!(rows[0].field("inputs").unwrap().values, vec![3, 4, 5]);
    }

    #[test]
    fn test_undeclared_field_leaves_state_untouched() {
        let mut packer = inputs_targets(8, 2);
        packer.submit(&example(&[("inputs", &[1, 2])])).unwrap();

        let err = packer
            .submit(&example(&[("inputs", &[3]), ("labels", &[4])]))
            .unwrap_err();
        assert!(matches!(err, PackError::FieldNotDeclared { ref field } if field == "labels"));

        let rows = packer.drain();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].num_examples(), 1);
        assert_eq!(rows[0].field("inputs").unwrap().values[..3], [1, 2, 0]);
    }

    #[test]
    fn test_empty_example_skipped_by_default() {
        let mut packer = inputs_targets(4, 2);
        assert!(packer.submit(&Example::new()).unwrap().is_empty());
        assert!(packer.submit(&example(&[("inputs", &[])])).unwrap().is_empty());
        assert_eq!(packer.open_bins(), 0);
        assert_eq!(packer.stats().examples_skipped, 2);
        assert!(packer.drain().is_empty());
    }

    #[test]
    fn test_empty_example_rejected() {
        let mut packer = inputs_targets(4, 2).with_empty_examples(EmptyExamplePolicy::Reject);
        let err = packer.submit(&example(&[("targets", &[])])).unwrap_err();
        assert!(matches!(err, PackError::EmptyExample));
    }

    #[test]
    fn test_submit_after_drain() {
        let mut packer = inputs_targets(4, 2);
        packer.submit(&example(&[("inputs", &[1])])).unwrap();
        assert_eq!(packer.drain().len(), 1);
        assert!(packer.is_closed());

        let err = packer.submit(&example(&[("inputs", &[2])])).unwrap_err();
        assert!(matches!(err, PackError::PackerClosed));
    }

    #[test]
    fn test_drain_is_idempotent() {
        let mut packer = inputs_targets(4, 2);
        packer.submit(&example(&[("inputs", &[1])])).unwrap();
        assert_eq!(packer.drain().len(), 1);
        assert!(packer.drain().is_empty());
        assert_eq!(packer.stats().rows_emitted, 1);
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let spec = FieldSpec::new([("x", 4)]).unwrap();
        let err = Packer::new(spec, 0).unwrap_err();
        assert!(matches!(err, PackError::InvalidConfig(_)));
    }
}
