// src/engine/delivery.rs

//! Output gate: decides when values produced by a tier's tasks may leave the
//! tier, and in what units.
//!
//! Ordering: by default a task's values are held back until every task
//! admitted before it has settled (completed or failed), so consumers see
//! values in admission order. In gathering mode values leave as soon as
//! their task completes.
//!
//! Buffering: released values are accumulated and leave in batches of
//! exactly `batch_size`; whatever remains when the tier drains is flushed
//! once as a final partial batch.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

/// One delivery unit: the input of a downstream task, or one item handed to
/// the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit<V> {
    pub values: Vec<V>,
    /// Oldest origin among the values; inherited by downstream tasks.
    pub origin: Instant,
}

#[derive(Debug)]
pub struct OutputGate<V> {
    gathering: bool,
    batch_size: Option<usize>,
    next_ordinal: u64,
    settled: u64,
    parked: BTreeMap<u64, (Instant, Vec<V>)>,
    released: VecDeque<(V, Instant)>,
    buffer: Vec<(V, Instant)>,
    final_flushed: bool,
}

impl<V> OutputGate<V> {
    /// `batch_size` is `Some` when buffering, and never zero.
    pub fn new(gathering: bool, batch_size: Option<usize>) -> Self {
        Self {
            gathering,
            batch_size,
            next_ordinal: 0,
            settled: 0,
            parked: BTreeMap::new(),
            released: VecDeque::new(),
            buffer: Vec::new(),
            final_flushed: false,
        }
    }

    /// Settle the task admitted with `ordinal`. `None` means it failed.
    pub fn settle(&mut self, ordinal: u64, origin: Instant, values: Option<Vec<V>>) {
        self.settled += 1;
        let values = values.unwrap_or_default();

        if self.gathering {
            self.released.extend(values.into_iter().map(|v| (v, origin)));
            return;
        }

        self.parked.insert(ordinal, (origin, values));
        while let Some((origin, values)) = self.parked.remove(&self.next_ordinal) {
            self.released.extend(values.into_iter().map(|v| (v, origin)));
            self.next_ordinal += 1;
        }
    }

    /// Units ready to leave the tier now.
    pub fn take_units(&mut self) -> Vec<Unit<V>> {
        match self.batch_size {
            None => self
                .released
                .drain(..)
                .map(|(value, origin)| Unit {
                    values: vec![value],
                    origin,
                })
                .collect(),
            Some(size) => {
                self.buffer.extend(self.released.drain(..));
                let mut units = Vec::new();
                while self.buffer.len() >= size {
                    let rest = self.buffer.split_off(size);
                    let batch = std::mem::replace(&mut self.buffer, rest);
                    units.extend(into_unit(batch));
                }
                units
            }
        }
    }

    /// Whether every one of `admitted` tasks has settled and nothing is
    /// waiting to be released (a partial buffer may remain).
    pub fn is_settled(&self, admitted: u64) -> bool {
        self.settled == admitted && self.parked.is_empty() && self.released.is_empty()
    }

    /// Flush the partial buffer at end-of-tier drain. Yields at most once.
    pub fn flush_final(&mut self) -> Option<Unit<V>> {
        if self.final_flushed {
            return None;
        }
        self.final_flushed = true;
        into_unit(std::mem::take(&mut self.buffer))
    }

    /// Drop everything held back (cancellation/abort).
    pub fn discard(&mut self) {
        self.parked.clear();
        self.released.clear();
        self.buffer.clear();
        self.final_flushed = true;
    }
}

fn into_unit<V>(batch: Vec<(V, Instant)>) -> Option<Unit<V>> {
    let origin = batch.iter().map(|(_, origin)| *origin).min()?;
    Some(Unit {
        values: batch.into_iter().map(|(value, _)| value).collect(),
        origin,
    })
}
