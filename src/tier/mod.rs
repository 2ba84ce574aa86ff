// src/tier/mod.rs

//! Task and tier model.
//!
//! - [`task`] defines the [`Task`] contract, the [`Step`] a task yields and
//!   per-task bookkeeping.
//! - [`stage`] defines the public [`Tier`] builder and the state a cell keeps
//!   for each tier (admission, readiness, concurrency cap, failures).

pub mod task;
pub mod stage;

pub use task::{from_fn, BoxTask, IoRequest, Step, Task, TaskId, TaskState};
pub use stage::{Spawner, Tier, TierId, TierStats};
