// src/engine/strategy.rs

//! Dispatch-ordering policies.
//!
//! A strategy only decides *which* queued requests go next. Concurrency caps
//! are enforced by the cell: candidates are offered only from tiers with
//! spare capacity, and whatever part of a selection no longer fits stays
//! queued for a later turn.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use crate::engine::workqueue::Candidate;
use crate::types::StrategyKind;

/// Pluggable ordering policy.
pub trait Strategy: fmt::Debug + Send {
    fn name(&self) -> &'static str;

    /// Pick the sequence numbers to dispatch next, in dispatch order.
    ///
    /// `pending` is in sequence order and never empty. Returning an empty
    /// selection stalls the cell until something completes.
    fn select(&mut self, pending: &[Candidate<'_>]) -> Vec<u64>;
}

impl StrategyKind {
    pub fn build(self) -> Box<dyn Strategy> {
        match self {
            StrategyKind::Fifo => Box::new(Fifo),
            StrategyKind::Latency => Box::new(Latency),
            StrategyKind::Bandwidth => Box::new(Bandwidth),
        }
    }
}

/// Strict submission order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl Strategy for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select(&mut self, pending: &[Candidate<'_>]) -> Vec<u64> {
        pending.iter().map(|c| c.seq).min().into_iter().collect()
    }
}

/// Oldest issue time first; ties broken by sequence number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Latency;

impl Strategy for Latency {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn select(&mut self, pending: &[Candidate<'_>]) -> Vec<u64> {
        pending
            .iter()
            .min_by_key(|c| (c.issued_at, c.seq))
            .map(|c| c.seq)
            .into_iter()
            .collect()
    }
}

/// Largest batch of requests sharing a target first.
///
/// Requests without a target form singleton batches. Batches are ranked by
/// request count, then by the (saturating) sum of their size estimates, then
/// by the oldest request they hold, then by lowest sequence number.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bandwidth;

#[derive(Debug)]
struct Batch {
    seqs: Vec<u64>,
    /// Summed size estimates, saturating at `u64::MAX`.
    weight: u64,
    oldest: Instant,
    first_seq: u64,
}

impl Batch {
    fn new(c: &Candidate<'_>) -> Self {
        Self {
            seqs: vec![c.seq],
            weight: c.size,
            oldest: c.issued_at,
            first_seq: c.seq,
        }
    }

    fn add(&mut self, c: &Candidate<'_>) {
        self.seqs.push(c.seq);
        self.weight = self.weight.saturating_add(c.size);
        self.oldest = self.oldest.min(c.issued_at);
        self.first_seq = self.first_seq.min(c.seq);
    }
}

impl Strategy for Bandwidth {
    fn name(&self) -> &'static str {
        "bandwidth"
    }

    fn select(&mut self, pending: &[Candidate<'_>]) -> Vec<u64> {
        let mut batches: Vec<Batch> = Vec::new();
        let mut by_target: HashMap<&str, usize> = HashMap::new();

        for c in pending {
            match c.target {
                Some(target) => match by_target.get(target) {
                    Some(&i) => batches[i].add(c),
                    None => {
                        by_target.insert(target, batches.len());
                        batches.push(Batch::new(c));
                    }
                },
                None => batches.push(Batch::new(c)),
            }
        }

        let best = batches.into_iter().max_by(|a, b| {
            a.seqs
                .len()
                .cmp(&b.seqs.len())
                .then_with(|| a.weight.cmp(&b.weight))
                .then_with(|| b.oldest.cmp(&a.oldest))
                .then_with(|| b.first_seq.cmp(&a.first_seq))
        });

        match best {
            Some(mut batch) => {
                batch.seqs.sort_unstable();
                batch.seqs
            }
            None => Vec::new(),
        }
    }
}
