//! Iterator adapters that drive a [`Packer`] from an example stream.
//!
//! The packer only sees one example at a time; these helpers own the
//! end-of-stream handling so partially filled bins are never dropped.

use std::collections::VecDeque;

use rayon::prelude::*;

use crate::config::PackerConfig;
use crate::error::Result;
use crate::fields::Example;
use crate::multipack::Packer;
use crate::row::PackedRow;

/// Lazily packs an upstream example iterator into rows.
///
/// Rows are yielded as soon as the packer evicts them. When the upstream is
/// exhausted the packer is drained exactly once. The first error ends the
/// stream.
pub struct PackedStream<I> {
    upstream: I,
    packer: Packer,
    pending: VecDeque<PackedRow>,
    done: bool,
}

impl<I: Iterator<Item = Example>> PackedStream<I> {
    /// Wrap `upstream` so its examples are fed to `packer` in order.
    pub fn new<U>(packer: Packer, upstream: U) -> Self
    where
        U: IntoIterator<Item = Example, IntoIter = I>,
    {
        Self {
            upstream: upstream.into_iter(),
            packer,
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// The packer driving this stream.
    pub fn packer(&self) -> &Packer {
        &self.packer
    }
}

impl<I: Iterator<Item = Example>> Iterator for PackedStream<I> {
    type Item = Result<PackedRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.done {
                return None;
            }

            match self.upstream.next() {
                Some(example) => match self.packer.submit(&example) {
                    Ok(rows) => self.pending.extend(rows),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                None => {
                    self.done = true;
                    self.pending.extend(self.packer.drain());
                    let stats = self.packer.stats();
                    tracing::info!(
                        "packed {} examples into {} rows ({} skipped, {} truncated)",
                        stats.examples_packed,
                        stats.rows_emitted,
                        stats.examples_skipped,
                        stats.examples_truncated,
                    );
                }
            }
        }
    }
}

/// Pack every example from `examples` and drain at the end.
pub fn pack_examples<U>(packer: Packer, examples: U) -> Result<Vec<PackedRow>>
where
    U: IntoIterator<Item = Example>,
{
    PackedStream::new(packer, examples).collect()
}

/// Pack independent shards in parallel, one packer per shard.
///
/// Examples are never packed across shards. Results come back in shard order.
pub fn pack_shards<S>(config: &PackerConfig, shards: Vec<S>) -> Result<Vec<Vec<PackedRow>>>
where
    S: IntoIterator<Item = Example> + Send,
{
    config.validate()?;
    shards
        .into_par_iter()
        .enumerate()
        .map(|(index, shard)| -> Result<Vec<PackedRow>> {
            let packer = Packer::from_config(config)?;
            let rows = pack_examples(packer, shard)?;
            tracing::debug!("shard {} produced {} rows", index, rows.len());
            Ok(rows)
        })
        .collect()
}
