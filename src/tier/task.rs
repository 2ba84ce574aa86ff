// src/tier/task.rs

//! The task contract and per-task bookkeeping.

use std::fmt;
use std::time::Instant;

/// Cell-wide task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request a task wants the IO primitive to perform.
#[derive(Debug, Clone)]
pub struct IoRequest<R> {
    pub payload: R,
    /// Estimated cost, used by the bandwidth strategy to weigh batches.
    pub size: u64,
    /// Shared destination/channel. Requests with the same target may be
    /// batched by the bandwidth strategy; `None` never batches.
    pub target: Option<String>,
}

impl<R> IoRequest<R> {
    pub fn new(payload: R) -> Self {
        Self {
            payload,
            size: 1,
            target: None,
        }
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// Outcome of advancing a task once.
#[derive(Debug)]
pub enum Step<R, V> {
    /// Suspend until every one of these requests has completed. An empty
    /// batch is a plain yield.
    Requests(Vec<IoRequest<R>>),
    /// Finished, emitting zero or more values.
    Done(Vec<V>),
    /// Finished unsuccessfully.
    Failed(anyhow::Error),
}

/// A resumable unit of work.
///
/// The first call to [`advance`](Task::advance) receives no responses. After
/// a `Step::Requests` batch the task is resumed once with one response per
/// request, in the order the requests were yielded.
pub trait Task<R, S, V>: Send {
    fn advance(&mut self, incoming: Vec<S>) -> Step<R, V>;

    /// Called once if the cell is cancelled or aborted while this task is
    /// still live. The task is never advanced afterwards.
    fn wind_down(&mut self) {}
}

pub type BoxTask<R, S, V> = Box<dyn Task<R, S, V>>;

struct FnTask<F>(F);

impl<R, S, V, F> Task<R, S, V> for FnTask<F>
where
    F: FnMut(Vec<S>) -> Step<R, V> + Send,
{
    fn advance(&mut self, incoming: Vec<S>) -> Step<R, V> {
        (self.0)(incoming)
    }
}

/// Adapt a closure into a boxed task.
pub fn from_fn<R, S, V, F>(f: F) -> BoxTask<R, S, V>
where
    F: FnMut(Vec<S>) -> Step<R, V> + Send + 'static,
    R: 'static,
    S: 'static,
    V: 'static,
{
    Box::new(FnTask(f))
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Admitted or resumed; waiting to be advanced.
    Pending,
    /// Currently being advanced.
    Running,
    /// Waiting for its requests to complete.
    SuspendedOnIo,
    Completed,
    Failed,
}

/// A live task owned by a tier.
pub(crate) struct TaskSlot<R, S, V> {
    pub id: TaskId,
    /// Admission ordinal within the tier (the tier's generation at admission).
    pub ordinal: u64,
    /// When the work this task serves entered the cell.
    pub origin: Instant,
    pub state: TaskState,
    task: BoxTask<R, S, V>,
    responses: Vec<Option<S>>,
    outstanding: usize,
}

impl<R, S, V> TaskSlot<R, S, V> {
    pub fn new(id: TaskId, ordinal: u64, origin: Instant, task: BoxTask<R, S, V>) -> Self {
        Self {
            id,
            ordinal,
            origin,
            state: TaskState::Pending,
            task,
            responses: Vec::new(),
            outstanding: 0,
        }
    }

    /// Advance the task with whatever responses have been collected.
    pub fn advance(&mut self) -> Step<R, V> {
        self.state = TaskState::Running;
        let incoming = std::mem::take(&mut self.responses)
            .into_iter()
            .flatten()
            .collect();
        self.task.advance(incoming)
    }

    /// Prepare to receive `count` responses.
    pub fn suspend(&mut self, count: usize) {
        self.state = TaskState::SuspendedOnIo;
        self.responses = (0..count).map(|_| None).collect();
        self.outstanding = count;
    }

    /// Store the response for request `index` of the current batch.
    ///
    /// Returns `true` once the batch is complete and the task can resume.
    pub fn deliver(&mut self, index: usize, response: S) -> bool {
        let Some(slot) = self.responses.get_mut(index) else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        *slot = Some(response);
        self.outstanding -= 1;

        if self.outstanding == 0 {
            self.state = TaskState::Pending;
            true
        } else {
            false
        }
    }

    pub fn wind_down(&mut self) {
        self.task.wind_down();
    }
}

impl<R, S, V> fmt::Debug for TaskSlot<R, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSlot")
            .field("id", &self.id)
            .field("ordinal", &self.ordinal)
            .field("state", &self.state)
            .field("outstanding", &self.outstanding)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_resumes_with_responses_in_request_order() {
        let task = from_fn(|incoming: Vec<u32>| Step::<(), u32>::Done(incoming));
        let mut slot = TaskSlot::new(TaskId(1), 0, Instant::now(), task);

        slot.suspend(3);
        assert!(!slot.deliver(2, 30));
        assert!(!slot.deliver(0, 10));
        assert_eq!(slot.state, TaskState::SuspendedOnIo);
        assert!(slot.deliver(1, 20));
        assert_eq!(slot.state, TaskState::Pending);

        match slot.advance() {
            Step::Done(values) => assert_eq!(values, vec![10, 20, 30]),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let task = from_fn(|_: Vec<u32>| Step::<(), u32>::Done(vec![]));
        let mut slot = TaskSlot::new(TaskId(1), 0, Instant::now(), task);
        slot.suspend(2);
        assert!(!slot.deliver(0, 1));
        assert!(!slot.deliver(0, 2));
        assert!(!slot.deliver(7, 3));
        assert!(slot.deliver(1, 4));
    }
}
