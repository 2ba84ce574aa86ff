// src/tier/stage.rs

//! Tier definition (public builder) and per-cell tier state.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Instant;

use tracing::{debug, warn};

use crate::engine::delivery::OutputGate;
use crate::errors::TaskError;
use crate::tier::task::{BoxTask, TaskId, TaskSlot, TaskState};

/// Index of a tier inside its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TierId(pub usize);

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.0)
    }
}

/// Builds the task that consumes one delivery unit from the upstream tier.
pub type Spawner<R, S, V> = Box<dyn FnMut(Vec<V>) -> BoxTask<R, S, V> + Send>;

/// A pipeline stage, as handed to a cell.
///
/// ```ignore
/// let fetch = Tier::new("fetch").task(list_task).concurrency(4);
/// let parse = Tier::new("parse").spawn_with(|pages| parse_task(pages));
/// cell.add_tier(fetch)?;
/// cell.append_tier(parse)?;
/// ```
pub struct Tier<R, S, V> {
    pub(crate) name: String,
    pub(crate) initial: Vec<BoxTask<R, S, V>>,
    pub(crate) spawner: Option<Spawner<R, S, V>>,
    pub(crate) concurrency: Option<usize>,
}

impl<R, S, V> Tier<R, S, V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: Vec::new(),
            spawner: None,
            concurrency: None,
        }
    }

    /// Add a task admitted as soon as the tier joins a cell.
    pub fn task(mut self, task: BoxTask<R, S, V>) -> Self {
        self.initial.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = BoxTask<R, S, V>>) -> Self {
        self.initial.extend(tasks);
        self
    }

    /// Factory for tasks fed by the upstream tier.
    pub fn spawn_with<F>(mut self, spawner: F) -> Self
    where
        F: FnMut(Vec<V>) -> BoxTask<R, S, V> + Send + 'static,
    {
        self.spawner = Some(Box::new(spawner));
        self
    }

    /// Maximum number of requests this tier may have in flight at once.
    pub fn concurrency(mut self, cap: usize) -> Self {
        self.concurrency = Some(cap);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn has_spawner(&self) -> bool {
        self.spawner.is_some()
    }
}

impl<R, S, V> fmt::Debug for Tier<R, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tier")
            .field("name", &self.name)
            .field("initial", &self.initial.len())
            .field("spawner", &self.spawner.is_some())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

/// Read-only snapshot of a tier's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStats {
    pub name: String,
    pub upstream: Option<TierId>,
    pub downstream: Option<TierId>,
    /// Tasks admitted so far (the tier's generation counter).
    pub admitted: u64,
    pub live: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub drained: bool,
    pub exhausted: bool,
}

/// Per-cell state of a tier.
pub(crate) struct TierState<R, S, V> {
    pub id: TierId,
    pub name: String,
    pub upstream: Option<TierId>,
    pub downstream: Option<TierId>,
    pub cap: Option<usize>,
    /// Monotonic admission counter; a task's ordinal is the value at admission.
    generation: u64,
    pub tasks: BTreeMap<TaskId, TaskSlot<R, S, V>>,
    pub ready: VecDeque<TaskId>,
    spawner: Option<Spawner<R, S, V>>,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures not yet reported; taken when the cell closes.
    pub failures: Vec<TaskError>,
    pub gate: OutputGate<V>,
    pub drained: bool,
    pub exhausted: bool,
}

impl<R, S, V> TierState<R, S, V> {
    pub fn new(
        id: TierId,
        tier: &mut Tier<R, S, V>,
        upstream: Option<TierId>,
        gate: OutputGate<V>,
    ) -> Self {
        Self {
            id,
            name: tier.name.clone(),
            upstream,
            downstream: None,
            cap: tier.concurrency,
            generation: 0,
            tasks: BTreeMap::new(),
            ready: VecDeque::new(),
            spawner: tier.spawner.take(),
            in_flight: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            gate,
            drained: false,
            exhausted: false,
        }
    }

    pub fn admitted(&self) -> u64 {
        self.generation
    }

    /// Admit a task; it becomes ready immediately.
    pub fn admit(&mut self, id: TaskId, task: BoxTask<R, S, V>, origin: Instant) {
        let ordinal = self.generation;
        self.generation += 1;
        self.tasks.insert(id, TaskSlot::new(id, ordinal, origin, task));
        self.ready.push_back(id);
        debug!(tier = %self.name, task = %id, ordinal, "task admitted");
    }

    /// Spawn a consumer task for one delivery unit from upstream.
    ///
    /// Returns `false` (dropping the input) when the tier has no spawner.
    pub fn spawn(&mut self, id: TaskId, input: Vec<V>, origin: Instant) -> bool {
        let Some(spawner) = self.spawner.as_mut() else {
            warn!(tier = %self.name, "tier has no spawner; dropping upstream delivery");
            return false;
        };
        let task = spawner(input);
        self.admit(id, task, origin);
        true
    }

    pub fn has_capacity(&self) -> bool {
        self.cap.is_none_or(|cap| self.in_flight < cap)
    }

    /// Pop the next task waiting to be advanced.
    pub fn next_ready(&mut self) -> Option<TaskId> {
        while let Some(id) = self.ready.pop_front() {
            if self
                .tasks
                .get(&id)
                .is_some_and(|slot| slot.state == TaskState::Pending)
            {
                return Some(id);
            }
        }
        None
    }

    /// Put a task that yielded without requests back in line.
    pub fn requeue(&mut self, id: TaskId) {
        if let Some(slot) = self.tasks.get_mut(&id) {
            slot.state = TaskState::Pending;
            self.ready.push_back(id);
        }
    }

    /// Record that a task is waiting on `count` requests.
    pub fn suspend(&mut self, id: TaskId, count: usize) {
        if let Some(slot) = self.tasks.get_mut(&id) {
            slot.suspend(count);
        }
    }

    /// Route one response to its task, readying the task once its batch is
    /// complete.
    pub fn deliver(&mut self, id: TaskId, index: usize, response: S) {
        let Some(slot) = self.tasks.get_mut(&id) else {
            debug!(tier = %self.name, task = %id, "response for a task that is gone; dropping");
            return;
        };
        if slot.deliver(index, response) {
            self.ready.push_back(id);
        }
    }

    /// Record a successful completion and hand the values to the gate.
    pub fn complete(&mut self, id: TaskId, values: Vec<V>) {
        if let Some(mut slot) = self.tasks.remove(&id) {
            slot.state = TaskState::Completed;
            self.succeeded += 1;
            debug!(tier = %self.name, task = %id, emitted = values.len(), "task completed");
            self.gate.settle(slot.ordinal, slot.origin, Some(values));
        }
    }

    /// Record a failure; the task's ordinal is settled with no output.
    pub fn fail(&mut self, id: TaskId, cause: anyhow::Error) {
        if let Some(mut slot) = self.tasks.remove(&id) {
            slot.state = TaskState::Failed;
            warn!(tier = %self.name, task = %id, error = %cause, "task failed");
            self.gate.settle(slot.ordinal, slot.origin, None);
            self.failed += 1;
            self.failures.push(TaskError {
                tier: self.name.clone(),
                task: id,
                cause,
            });
        }
    }

    /// Whether every admitted task failed.
    pub fn all_failed(&self) -> bool {
        self.generation > 0 && self.succeeded == 0 && self.failed as u64 == self.generation
    }

    /// Ask every live task to wind down and drop it.
    pub fn wind_down(&mut self) -> usize {
        let live = self.tasks.len();
        for slot in self.tasks.values_mut() {
            slot.wind_down();
        }
        self.tasks.clear();
        self.ready.clear();
        self.gate.discard();
        live
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            name: self.name.clone(),
            upstream: self.upstream,
            downstream: self.downstream,
            admitted: self.generation,
            live: self.tasks.len(),
            in_flight: self.in_flight,
            succeeded: self.succeeded,
            failed: self.failed,
            drained: self.drained,
            exhausted: self.exhausted,
        }
    }
}

impl<R, S, V> fmt::Debug for TierState<R, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierState")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("upstream", &self.upstream)
            .field("downstream", &self.downstream)
            .field("cap", &self.cap)
            .field("generation", &self.generation)
            .field("live", &self.tasks.len())
            .field("in_flight", &self.in_flight)
            .field("drained", &self.drained)
            .finish_non_exhaustive()
    }
}
