// src/lib.rs

//! Tiered scheduling of asynchronous IO work.
//!
//! A [`Cell`] owns an ordered set of [`Tier`]s. Each tier runs resumable
//! [`Task`]s that yield [`IoRequest`]s; the cell queues those requests,
//! dispatches them through an [`IoPrimitive`] in the order chosen by a
//! [`Strategy`], resumes tasks with their responses and pipes each tier's
//! outputs into the next tier or out to the caller.
//!
//! ```ignore
//! let mut cell = Cell::new(SpawnedPrimitive::new(), CellOptions::default());
//! cell.add_tier(Tier::new("fetch").tasks(fetchers).concurrency(8))?;
//! cell.append_tier(Tier::new("parse").spawn_with(parse_task))?;
//! cell.run(|batch| println!("{batch:?}")).await?;
//! ```

pub mod config;
pub mod engine;
pub mod errors;
pub mod io;
pub mod logging;
pub mod tier;
pub mod types;

pub use crate::config::CellConfig;
pub use crate::engine::{Batch, CancelHandle, Cell, CellOptions, CellState, Strategy};
pub use crate::errors::{
    AggregateError, CellAbortError, CellError, Result, TaskError, TierExhaustedError,
};
pub use crate::io::{IoPrimitive, SpawnedPrimitive, Token};
pub use crate::tier::{from_fn, BoxTask, IoRequest, Step, Task, Tier, TierId, TierStats};
pub use crate::types::{FailurePolicy, StrategyKind};
