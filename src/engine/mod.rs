// src/engine/mod.rs

//! Scheduling engine.
//!
//! - [`workqueue`] holds requests awaiting dispatch.
//! - [`strategy`] decides which queued requests dispatch next.
//! - [`delivery`] implements ordered/gathering release and buffering.
//! - [`core`] is the pure, synchronous cell state machine. It owns tiers,
//!   the workqueue and the strategy but performs no IO and knows nothing
//!   about tokio.
//! - [`cell`] is the async shell that drives the core against an
//!   [`IoPrimitive`](crate::io::IoPrimitive) and exposes the pull, push and
//!   blocking consumption protocols.

use crate::types::{FailurePolicy, StrategyKind};

/// Batch size used when buffering is enabled without an explicit size.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// One delivery unit handed to the caller. Without buffering it always
/// holds exactly one value.
pub type Batch<V> = Vec<V>;

/// Lifecycle of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Built, not yet pulled.
    Idle,
    Running,
    /// Cancelled; waiting for in-flight requests to report back.
    Draining,
    Closed,
}

/// Cell-wide knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellOptions {
    pub strategy: StrategyKind,
    /// Deliver outputs in batches of `batch_size` instead of one at a time.
    pub buffering: bool,
    pub batch_size: usize,
    /// Release outputs in completion order instead of admission order.
    pub gathering: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for CellOptions {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            buffering: false,
            batch_size: DEFAULT_BATCH_SIZE,
            gathering: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl CellOptions {
    pub fn new(strategy: StrategyKind, buffering: bool, gathering: bool) -> Self {
        Self {
            strategy,
            buffering,
            gathering,
            ..Self::default()
        }
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable buffering with the given batch size.
    pub fn buffered(mut self, batch_size: usize) -> Self {
        self.buffering = true;
        self.batch_size = batch_size;
        self
    }

    pub fn gathering(mut self, gathering: bool) -> Self {
        self.gathering = gathering;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn fail_fast(self) -> Self {
        self.failure_policy(FailurePolicy::FailFast)
    }

    pub(crate) fn buffer_size(&self) -> Option<usize> {
        self.buffering.then_some(self.batch_size)
    }
}

pub mod cell;
pub mod core;
pub mod delivery;
pub mod strategy;
pub mod workqueue;

pub use self::cell::{BlockingIter, CancelHandle, Cell};
pub use self::core::{CellCore, Dispatch};
pub use strategy::{Bandwidth, Fifo, Latency, Strategy};
pub use workqueue::{Candidate, Ticket, Workqueue};
