// src/engine/workqueue.rs

//! Holding area for requests awaiting dispatch.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::tier::{IoRequest, TaskId, TierId};

/// Where a request came from and where its response must go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub seq: u64,
    pub tier: TierId,
    pub task: TaskId,
    /// Position of the request in its task's batch.
    pub index: usize,
}

/// A request sitting in the workqueue.
#[derive(Debug)]
pub struct QueuedRequest<R> {
    pub ticket: Ticket,
    pub issued_at: Instant,
    pub size: u64,
    pub target: Option<String>,
    pub payload: R,
}

/// The view of a queued request a [`Strategy`](super::strategy::Strategy)
/// chooses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub seq: u64,
    pub tier: TierId,
    pub issued_at: Instant,
    pub size: u64,
    pub target: Option<&'a str>,
}

/// Queued requests keyed by their unique, monotonically increasing sequence
/// number.
#[derive(Debug)]
pub struct Workqueue<R> {
    next_seq: u64,
    entries: BTreeMap<u64, QueuedRequest<R>>,
}

impl<R> Default for Workqueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Workqueue<R> {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queue a request, returning its sequence number.
    pub fn push(
        &mut self,
        tier: TierId,
        task: TaskId,
        index: usize,
        issued_at: Instant,
        request: IoRequest<R>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            seq,
            QueuedRequest {
                ticket: Ticket {
                    seq,
                    tier,
                    task,
                    index,
                },
                issued_at,
                size: request.size,
                target: request.target,
                payload: request.payload,
            },
        );
        seq
    }

    /// Candidates from tiers accepted by `eligible`, in sequence order.
    pub fn candidates(&self, mut eligible: impl FnMut(TierId) -> bool) -> Vec<Candidate<'_>> {
        self.entries
            .values()
            .filter(|entry| eligible(entry.ticket.tier))
            .map(|entry| Candidate {
                seq: entry.ticket.seq,
                tier: entry.ticket.tier,
                issued_at: entry.issued_at,
                size: entry.size,
                target: entry.target.as_deref(),
            })
            .collect()
    }

    pub fn tier_of(&self, seq: u64) -> Option<TierId> {
        self.entries.get(&seq).map(|entry| entry.ticket.tier)
    }

    /// Remove an entry for dispatch.
    pub fn take(&mut self, seq: u64) -> Option<QueuedRequest<R>> {
        self.entries.remove(&seq)
    }

    /// Drop every queued entry, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_are_unique_and_increasing() {
        let mut q = Workqueue::new();
        let now = Instant::now();
        let a = q.push(TierId(0), TaskId(1), 0, now, IoRequest::new("a"));
        let b = q.push(TierId(1), TaskId(2), 0, now, IoRequest::new("b"));
        let c = q.push(TierId(0), TaskId(1), 1, now, IoRequest::new("c"));
        assert!(a < b && b < c);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn candidates_respect_eligibility_and_entries_leave_once() {
        let mut q = Workqueue::new();
        let now = Instant::now();
        q.push(TierId(0), TaskId(1), 0, now, IoRequest::new("a").target("x"));
        let b = q.push(TierId(1), TaskId(2), 0, now, IoRequest::new("b").size(5));

        let only_tier1 = q.candidates(|tier| tier == TierId(1));
        assert_eq!(only_tier1.len(), 1);
        assert_eq!(only_tier1[0].seq, b);
        assert_eq!(only_tier1[0].size, 5);

        let taken = q.take(b).expect("entry present");
        assert_eq!(taken.payload, "b");
        assert!(q.take(b).is_none());
        assert_eq!(q.clear(), 1);
        assert!(q.is_empty());
    }
}
