// src/engine/core.rs

//! Pure cell state machine.
//!
//! [`CellCore`] owns the tiers, the workqueue and the strategy. It advances
//! tasks, routes their outputs through each tier's gate, plans which queued
//! requests to dispatch and routes completions back to tasks.
//!
//! It has **no** Tokio types and performs no IO: the async shell
//! ([`Cell`](super::Cell)) submits what [`CellCore::plan_dispatch`] returns,
//! binds the primitive's tokens with [`CellCore::bind`] and feeds
//! completions back through [`CellCore::complete`]. That keeps every
//! scheduling rule unit-testable by stepping the core by hand.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::engine::delivery::{OutputGate, Unit};
use crate::engine::strategy::Strategy;
use crate::engine::workqueue::{Ticket, Workqueue};
use crate::engine::{Batch, CellOptions, CellState};
use crate::errors::{AggregateError, CellAbortError, CellError, Result, TierExhaustedError};
use crate::io::Token;
use crate::tier::task::Step;
use crate::tier::{TaskId, Tier, TierId, TierStats};
use crate::tier::stage::TierState;
use crate::types::FailurePolicy;

/// A request taken off the workqueue, ready to be submitted.
#[derive(Debug)]
pub struct Dispatch<R> {
    pub ticket: Ticket,
    pub payload: R,
}

pub struct CellCore<R, S, V> {
    options: CellOptions,
    strategy: Box<dyn Strategy>,
    tiers: Vec<TierState<R, S, V>>,
    queue: Workqueue<R>,
    in_flight: HashMap<Token, Ticket>,
    outputs: VecDeque<Batch<V>>,
    state: CellState,
    /// Tier the next round-robin round starts from.
    cursor: usize,
    next_task: u64,
    abort: Option<(CellAbortError, Vec<Token>)>,
    final_error: Option<AggregateError>,
}

impl<R, S, V> CellCore<R, S, V> {
    pub fn new(options: CellOptions) -> Self {
        Self::with_strategy(options.strategy.build(), options)
    }

    pub fn with_strategy(strategy: Box<dyn Strategy>, options: CellOptions) -> Self {
        Self {
            options,
            strategy,
            tiers: Vec::new(),
            queue: Workqueue::new(),
            in_flight: HashMap::new(),
            outputs: VecDeque::new(),
            state: CellState::Idle,
            cursor: 0,
            next_task: 0,
            abort: None,
            final_error: None,
        }
    }

    pub fn options(&self) -> &CellOptions {
        &self.options
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn tier_stats(&self, id: TierId) -> Option<TierStats> {
        self.tiers.get(id.0).map(TierState::stats)
    }

    /// The most recently added tier.
    pub fn last_tier(&self) -> Option<TierId> {
        self.tiers.last().map(|tier| tier.id)
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Add a tier, optionally as the consumer of `upstream`.
    pub fn add_tier(&mut self, mut tier: Tier<R, S, V>, upstream: Option<TierId>) -> Result<TierId> {
        if self.state != CellState::Idle {
            return Err(CellError::TierLayout(format!(
                "cannot add tier '{}' once the cell has started",
                tier.name
            )));
        }
        if self.options.buffer_size() == Some(0) {
            return Err(CellError::ConfigError(format!(
                "tier '{}': batch_size must be at least 1 when buffering",
                tier.name
            )));
        }
        if tier.concurrency == Some(0) {
            return Err(CellError::ConfigError(format!(
                "tier '{}': concurrency must be at least 1",
                tier.name
            )));
        }
        if let Some(up) = upstream {
            let Some(source) = self.tiers.get(up.0) else {
                return Err(CellError::TierLayout(format!(
                    "tier '{}' references unknown source {up}",
                    tier.name
                )));
            };
            if let Some(existing) = source.downstream {
                return Err(CellError::TierLayout(format!(
                    "tier '{}' already feeds {}; cannot also feed '{}'",
                    source.name, self.tiers[existing.0].name, tier.name
                )));
            }
            if !tier.has_spawner() {
                return Err(CellError::TierLayout(format!(
                    "tier '{}' consumes '{}' but has no spawner",
                    tier.name, source.name
                )));
            }
        }

        let id = TierId(self.tiers.len());
        let gate = OutputGate::new(self.options.gathering, self.options.buffer_size());
        let mut state = TierState::new(id, &mut tier, upstream, gate);

        let admitted_at = Instant::now();
        for task in tier.initial.drain(..) {
            let task_id = self.allocate_task_id();
            state.admit(task_id, task, admitted_at);
        }

        if let Some(up) = upstream {
            self.tiers[up.0].downstream = Some(id);
        }
        info!(
            tier = %state.name,
            id = %id,
            upstream = ?upstream,
            cap = ?state.cap,
            tasks = state.admitted(),
            "tier added"
        );
        self.tiers.push(state);
        Ok(id)
    }

    /// Run task advancement and output routing until either a delivery is
    /// available or nothing more can happen without IO.
    pub fn pump(&mut self) {
        if self.state == CellState::Idle {
            debug!(tiers = self.tiers.len(), strategy = self.strategy.name(), "cell running");
            self.state = CellState::Running;
        }

        if self.state == CellState::Running {
            loop {
                let advanced = self.advance_round();
                let routed = self.route_outputs();
                if self.abort.is_some() {
                    return;
                }
                if !self.outputs.is_empty() || !(advanced || routed) {
                    break;
                }
            }
        }

        self.maybe_close();
    }

    /// Take queued requests the strategy selects, while tier caps allow.
    pub fn plan_dispatch(&mut self) -> Vec<Dispatch<R>> {
        let mut planned = Vec::new();
        if self.state != CellState::Running {
            return planned;
        }

        loop {
            let tiers = &self.tiers;
            let candidates = self.queue.candidates(|tier| tiers[tier.0].has_capacity());
            if candidates.is_empty() {
                break;
            }
            let selected = self.strategy.select(&candidates);

            let mut took_any = false;
            for seq in selected {
                let Some(tier) = self.queue.tier_of(seq) else {
                    warn!(seq, strategy = self.strategy.name(), "strategy selected an unknown request");
                    continue;
                };
                if !self.tiers[tier.0].has_capacity() {
                    continue;
                }
                let Some(entry) = self.queue.take(seq) else {
                    continue;
                };
                self.tiers[tier.0].in_flight += 1;
                debug!(
                    tier = %self.tiers[tier.0].name,
                    task = %entry.ticket.task,
                    seq,
                    size = entry.size,
                    dest = ?entry.target,
                    "dispatching request"
                );
                planned.push(Dispatch {
                    ticket: entry.ticket,
                    payload: entry.payload,
                });
                took_any = true;
            }

            if !took_any {
                break;
            }
        }
        planned
    }

    /// Associate a submitted request with the primitive's token.
    pub fn bind(&mut self, token: Token, ticket: Ticket) {
        self.in_flight.insert(token, ticket);
    }

    /// Route completions reported by the primitive to their tasks.
    pub fn complete(&mut self, ready: Vec<(Token, S)>) {
        for (token, response) in ready {
            let Some(ticket) = self.in_flight.remove(&token) else {
                warn!(%token, "completion for unknown token; dropping");
                continue;
            };
            let tier = &mut self.tiers[ticket.tier.0];
            tier.in_flight = tier.in_flight.saturating_sub(1);

            if self.state != CellState::Running {
                debug!(tier = %tier.name, %token, "discarding completion after cancellation");
                continue;
            }
            tier.deliver(ticket.task, ticket.index, response);
        }
        self.maybe_close();
    }

    /// Cooperative cancellation. In-flight requests are left to finish;
    /// their results are discarded.
    pub fn cancel(&mut self) {
        if matches!(self.state, CellState::Draining | CellState::Closed) {
            return;
        }
        let dropped = self.queue.clear();
        let wound_down: usize = self.tiers.iter_mut().map(TierState::wind_down).sum();
        self.outputs.clear();
        self.state = CellState::Draining;
        info!(
            dropped_requests = dropped,
            wound_down,
            in_flight = self.in_flight.len(),
            "cell cancelled"
        );
        self.maybe_close();
    }

    /// Close immediately after a fatal error, returning the tokens still in
    /// flight so the shell can try to cancel them.
    pub fn shut_down(&mut self) -> Vec<Token> {
        let tokens = self.teardown();
        self.state = CellState::Closed;
        tokens
    }

    pub fn pop_output(&mut self) -> Option<Batch<V>> {
        self.outputs.pop_front()
    }

    /// The fail-fast abort, with the tokens that must be cancelled.
    pub fn take_abort(&mut self) -> Option<(CellAbortError, Vec<Token>)> {
        self.abort.take()
    }

    /// Failures recorded by a run that drained. Yields at most once.
    pub fn take_final_error(&mut self) -> Option<AggregateError> {
        self.final_error.take()
    }

    /// Running, but nothing is queued, in flight, ready or deliverable.
    pub fn is_stalled(&self) -> bool {
        self.state == CellState::Running
            && self.in_flight.is_empty()
            && self.queue.is_empty()
            && self.outputs.is_empty()
            && self.tiers.iter().all(|tier| tier.ready.is_empty())
    }

    fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        id
    }

    /// One round-robin pass over the tiers. Each tier advances the tasks
    /// that were ready when its turn began. Returns whether any task did
    /// more than yield.
    fn advance_round(&mut self) -> bool {
        let count = self.tiers.len();
        if count == 0 {
            return false;
        }
        let start = self.cursor % count;
        self.cursor = (start + 1) % count;

        let mut progressed = false;
        for offset in 0..count {
            let idx = (start + offset) % count;
            if !self.tiers[idx].has_capacity() {
                debug!(tier = %self.tiers[idx].name, "tier saturated; skipping");
                continue;
            }
            let budget = self.tiers[idx].ready.len();
            for _ in 0..budget {
                let Some(id) = self.tiers[idx].next_ready() else {
                    break;
                };
                progressed |= self.advance_task(idx, id);
            }
        }
        progressed
    }

    fn advance_task(&mut self, idx: usize, id: TaskId) -> bool {
        let tier = &mut self.tiers[idx];
        let Some(slot) = tier.tasks.get_mut(&id) else {
            return false;
        };
        let origin = slot.origin;

        match slot.advance() {
            Step::Requests(requests) if requests.is_empty() => {
                tier.requeue(id);
                false
            }
            Step::Requests(requests) => {
                let count = requests.len();
                for (index, request) in requests.into_iter().enumerate() {
                    self.queue.push(tier.id, id, index, origin, request);
                }
                tier.suspend(id, count);
                debug!(tier = %tier.name, task = %id, requests = count, "task suspended on IO");
                true
            }
            Step::Done(values) => {
                tier.complete(id, values);
                true
            }
            Step::Failed(cause) => {
                tier.fail(id, cause);
                true
            }
        }
    }

    /// Release gated outputs tier by tier, spawning downstream tasks or
    /// queueing caller deliveries, and detect drained tiers.
    fn route_outputs(&mut self) -> bool {
        let mut progressed = false;
        for idx in 0..self.tiers.len() {
            for unit in self.tiers[idx].gate.take_units() {
                self.deliver_unit(idx, unit);
                progressed = true;
            }
            if self.try_drain(idx) {
                progressed = true;
            }
            if self.abort.is_some() {
                return true;
            }
        }
        progressed
    }

    fn deliver_unit(&mut self, idx: usize, unit: Unit<V>) {
        match self.tiers[idx].downstream {
            Some(down) => {
                let id = self.allocate_task_id();
                self.tiers[down.0].spawn(id, unit.values, unit.origin);
            }
            None => self.outputs.push_back(unit.values),
        }
    }

    fn try_drain(&mut self, idx: usize) -> bool {
        let upstream_drained = self.tiers[idx]
            .upstream
            .is_none_or(|up| self.tiers[up.0].drained);

        let tier = &mut self.tiers[idx];
        if tier.drained
            || !upstream_drained
            || !tier.tasks.is_empty()
            || !tier.gate.is_settled(tier.admitted())
        {
            return false;
        }

        if let Some(unit) = tier.gate.flush_final() {
            debug!(tier = %tier.name, values = unit.values.len(), "flushing final partial batch");
            self.deliver_unit(idx, unit);
        }

        let tier = &mut self.tiers[idx];
        tier.drained = true;
        info!(
            tier = %tier.name,
            admitted = tier.admitted(),
            succeeded = tier.succeeded,
            failed = tier.failed,
            "tier drained"
        );

        if tier.all_failed() {
            tier.exhausted = true;
            warn!(tier = %tier.name, failed = tier.failed, "tier exhausted");
            if self.options.failure_policy == FailurePolicy::FailFast {
                self.abort_with(idx);
            }
        }
        true
    }

    fn abort_with(&mut self, idx: usize) {
        let tier = &self.tiers[idx];
        let cause = TierExhaustedError {
            tier: tier.name.clone(),
            failed: tier.failed,
        };
        let name = tier.name.clone();

        let tokens = self.teardown();
        self.state = CellState::Closed;
        error!(tier = %name, cancelled = tokens.len(), "aborting cell (fail-fast)");
        self.abort = Some((
            CellAbortError {
                tier: name,
                cancelled: tokens.len(),
                cause,
            },
            tokens,
        ));
    }

    /// Drop all pending work, returning in-flight tokens in submission order.
    fn teardown(&mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.in_flight.drain().map(|(token, _)| token).collect();
        tokens.sort();
        for tier in &mut self.tiers {
            tier.wind_down();
            tier.in_flight = 0;
        }
        self.queue.clear();
        self.outputs.clear();
        tokens
    }

    fn maybe_close(&mut self) {
        match self.state {
            CellState::Draining if self.in_flight.is_empty() => {
                self.state = CellState::Closed;
                info!("cell closed after cancellation");
            }
            CellState::Running
                if self.in_flight.is_empty()
                    && self.queue.is_empty()
                    && self.tiers.iter().all(|tier| tier.drained) =>
            {
                self.state = CellState::Closed;

                let errors: Vec<_> = self
                    .tiers
                    .iter_mut()
                    .flat_map(|tier| std::mem::take(&mut tier.failures))
                    .collect();
                let exhausted: Vec<String> = self
                    .tiers
                    .iter()
                    .filter(|tier| tier.exhausted)
                    .map(|tier| tier.name.clone())
                    .collect();
                info!(failures = errors.len(), "cell drained");

                if !errors.is_empty() {
                    self.final_error = Some(AggregateError { errors, exhausted });
                }
            }
            _ => {}
        }
    }
}

impl<R, S, V> fmt::Debug for CellCore<R, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellCore")
            .field("options", &self.options)
            .field("strategy", &self.strategy)
            .field("tiers", &self.tiers)
            .field("queued", &self.queue.len())
            .field("in_flight", &self.in_flight.len())
            .field("outputs", &self.outputs.len())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
