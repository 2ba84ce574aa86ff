// src/engine/cell.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::CellConfig;
use crate::errors::{CellError, PrimitiveOp, Result};
use crate::io::IoPrimitive;
use crate::tier::{Tier, TierId, TierStats};

use super::core::CellCore;
use super::strategy::Strategy;
use super::{Batch, CellOptions, CellState};

/// Cloneable handle that cancels its cell from anywhere (a callback,
/// another task, another thread). Observed between scheduling turns.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type CellTier<P, V> = Tier<<P as IoPrimitive>::Request, <P as IoPrimitive>::Response, V>;

type Cleaner = Box<dyn FnOnce() + Send>;

/// Drives a [`CellCore`] against an [`IoPrimitive`].
///
/// This is the async shell around the core: it owns the primitive, submits
/// what the core plans, awaits completions and feeds them back. All
/// scheduling semantics live in the core.
///
/// Dropping a cell part-way through cancels whatever is still in flight,
/// closes the primitive and runs the registered cleaners.
pub struct Cell<P: IoPrimitive, V> {
    core: CellCore<P::Request, P::Response, V>,
    primitive: P,
    cancel: CancelHandle,
    opened: bool,
    primitive_closed: bool,
    cleaners: Vec<Cleaner>,
}

impl<P: IoPrimitive, V> fmt::Debug for Cell<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("core", &self.core)
            .field("opened", &self.opened)
            .field("cleaners", &self.cleaners.len())
            .finish_non_exhaustive()
    }
}

impl<P: IoPrimitive, V> Cell<P, V> {
    pub fn new(primitive: P, options: CellOptions) -> Self {
        Self::from_core(CellCore::new(options), primitive)
    }

    /// Use a custom strategy instead of the one named in `options`.
    pub fn with_strategy(primitive: P, strategy: Box<dyn Strategy>, options: CellOptions) -> Self {
        Self::from_core(CellCore::with_strategy(strategy, options), primitive)
    }

    fn from_core(core: CellCore<P::Request, P::Response, V>, primitive: P) -> Self {
        Self {
            core,
            primitive,
            cancel: CancelHandle::default(),
            opened: false,
            primitive_closed: false,
            cleaners: Vec::new(),
        }
    }

    /// Build a cell whose tiers are laid out as described by `config`.
    ///
    /// Every tier named in the config must be supplied (matched by name) and
    /// every supplied tier must be named in the config. A `concurrency`
    /// set in the config overrides the tier's own.
    pub fn from_config(
        primitive: P,
        config: &CellConfig,
        tiers: impl IntoIterator<Item = CellTier<P, V>>,
    ) -> Result<Self> {
        let mut supplied: BTreeMap<String, CellTier<P, V>> = BTreeMap::new();
        for tier in tiers {
            let name = tier.name().to_string();
            if supplied.insert(name.clone(), tier).is_some() {
                return Err(CellError::ConfigError(format!(
                    "tier '{name}' supplied more than once"
                )));
            }
        }

        let mut cell = Self::new(primitive, config.options());
        let mut ids: BTreeMap<&str, TierId> = BTreeMap::new();

        for name in config.order() {
            let section = config
                .tier(name)
                .ok_or_else(|| CellError::ConfigError(format!("unknown tier '{name}'")))?;
            let mut tier = supplied.remove(name.as_str()).ok_or_else(|| {
                CellError::ConfigError(format!("config names tier '{name}' but none was supplied"))
            })?;
            if let Some(cap) = section.concurrency {
                tier = tier.concurrency(cap);
            }

            let upstream = match section.source.as_deref() {
                Some(source) => Some(*ids.get(source).ok_or_else(|| {
                    CellError::TierLayout(format!("tier '{name}' laid out before its source '{source}'"))
                })?),
                None => None,
            };
            let id = cell.core.add_tier(tier, upstream)?;
            ids.insert(name.as_str(), id);
        }

        if let Some(extra) = supplied.keys().next() {
            return Err(CellError::ConfigError(format!(
                "tier '{extra}' is not described by the config"
            )));
        }
        Ok(cell)
    }

    /// Add a root tier (no upstream).
    pub fn add_tier(&mut self, tier: CellTier<P, V>) -> Result<TierId> {
        self.core.add_tier(tier, None)
    }

    /// Chain `tier` as the consumer of the most recently added tier.
    pub fn append_tier(&mut self, tier: CellTier<P, V>) -> Result<TierId> {
        let source = self.core.last_tier().ok_or_else(|| {
            CellError::TierLayout(format!("cannot append '{}': the cell has no tiers", tier.name()))
        })?;
        self.core.add_tier(tier, Some(source))
    }

    /// Chain `tier` as the consumer of `source`.
    pub fn add_tier_from(&mut self, source: TierId, tier: CellTier<P, V>) -> Result<TierId> {
        self.core.add_tier(tier, Some(source))
    }

    /// Register a job that runs once the cell is done: after it drains,
    /// aborts, fails, is cancelled or is dropped. Cleaners run in
    /// registration order, after the primitive is closed.
    pub fn add_cleaner<F>(&mut self, cleaner: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.core.state() != CellState::Idle {
            return Err(CellError::ConfigError(
                "cannot add a cleaner once the cell has started".to_string(),
            ));
        }
        self.cleaners.push(Box::new(cleaner));
        Ok(())
    }

    pub fn state(&self) -> CellState {
        self.core.state()
    }

    pub fn tier_stats(&self, id: TierId) -> Option<TierStats> {
        self.core.tier_stats(id)
    }

    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel the cell. Queued requests are dropped and live tasks wound
    /// down; requests already in flight finish and their results are
    /// discarded. The cell then closes without error.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.core.cancel();
    }

    /// Pull the next delivery unit, doing only the work needed to produce it.
    ///
    /// Returns `None` once the cell has closed, after reporting any
    /// [`AggregateError`](crate::errors::AggregateError) a single time.
    pub async fn next_batch(&mut self) -> Option<Result<Batch<V>>> {
        loop {
            if self.cancel.is_cancelled() {
                self.core.cancel();
            }
            if let Some(batch) = self.core.pop_output() {
                return Some(Ok(batch));
            }
            if self.core.state() == CellState::Closed {
                self.finish();
                return self.core.take_final_error().map(|err| Err(err.into()));
            }

            if !self.opened {
                self.opened = true;
                if let Err(err) = self.primitive.open() {
                    return Some(Err(self.fail(PrimitiveOp::Open, err)));
                }
                info!(state = ?self.core.state(), "cell started");
            }

            self.core.pump();

            if let Some((abort, tokens)) = self.core.take_abort() {
                for token in tokens {
                    if let Err(err) = self.primitive.cancel(token) {
                        warn!(%token, error = %err, "failed to cancel in-flight request during abort");
                    }
                }
                self.finish();
                return Some(Err(abort.into()));
            }
            if let Some(batch) = self.core.pop_output() {
                return Some(Ok(batch));
            }
            if self.core.state() == CellState::Closed {
                continue;
            }

            if self.cancel.is_cancelled() {
                self.core.cancel();
            }
            for dispatch in self.core.plan_dispatch() {
                match self.primitive.submit(dispatch.payload) {
                    Ok(token) => {
                        debug!(%token, seq = dispatch.ticket.seq, "request submitted");
                        self.core.bind(token, dispatch.ticket);
                    }
                    Err(err) => return Some(Err(self.fail(PrimitiveOp::Submit, err))),
                }
            }

            if self.core.has_in_flight() {
                match self.primitive.wait_ready().await {
                    Ok(ready) => {
                        debug!(completions = ready.len(), "primitive reported completions");
                        self.core.complete(ready);
                    }
                    Err(err) => return Some(Err(self.fail(PrimitiveOp::Wait, err))),
                }
            } else if self.core.is_stalled() {
                error!("cell stalled with undrained tiers and no pending work");
                self.core.shut_down();
                self.finish();
                return Some(Err(CellError::Other(anyhow::anyhow!(
                    "cell stalled: tiers cannot drain and no work is pending"
                ))));
            } else {
                // Only yielding tasks are left; let other futures run.
                tokio::task::yield_now().await;
            }
        }
    }

    /// Drive the cell to completion, handing each delivery unit to
    /// `on_batch`.
    pub async fn run<F>(&mut self, mut on_batch: F) -> Result<()>
    where
        F: FnMut(Batch<V>),
    {
        while let Some(batch) = self.next_batch().await {
            on_batch(batch?);
        }
        Ok(())
    }

    /// Like [`run`](Self::run), on a private current-thread runtime.
    ///
    /// Must not be called from within a Tokio runtime.
    pub fn run_blocking<F>(&mut self, on_batch: F) -> Result<()>
    where
        F: FnMut(Batch<V>),
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(on_batch))
    }

    /// Consume the cell as a blocking iterator over delivery units, driven
    /// by a private current-thread runtime.
    pub fn into_blocking_iter(self) -> Result<BlockingIter<P, V>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(BlockingIter {
            cell: self,
            runtime,
        })
    }

    fn fail(&mut self, op: PrimitiveOp, source: anyhow::Error) -> CellError {
        error!(%op, error = %source, "IO primitive failed; closing cell");
        self.cancel_in_flight();
        self.finish();
        CellError::primitive(op, source)
    }

    /// Close the core and cancel its in-flight requests, best effort.
    fn cancel_in_flight(&mut self) {
        for token in self.core.shut_down() {
            if let Err(err) = self.primitive.cancel(token) {
                warn!(%token, error = %err, "best-effort cancel failed");
            }
        }
    }

    fn finish(&mut self) {
        self.close_primitive();
        if !self.cleaners.is_empty() {
            debug!(cleaners = self.cleaners.len(), "running cleaners");
            for cleaner in self.cleaners.drain(..) {
                cleaner();
            }
        }
    }

    fn close_primitive(&mut self) {
        if self.opened && !self.primitive_closed {
            self.primitive_closed = true;
            self.primitive.close();
            info!("cell closed");
        }
    }
}

impl<P: IoPrimitive, V> Drop for Cell<P, V> {
    fn drop(&mut self) {
        if self.core.state() != CellState::Closed {
            debug!(state = ?self.core.state(), "cell dropped before closing");
            self.cancel_in_flight();
        }
        self.finish();
    }
}

/// Blocking iterator returned by [`Cell::into_blocking_iter`].
pub struct BlockingIter<P: IoPrimitive, V> {
    cell: Cell<P, V>,
    runtime: tokio::runtime::Runtime,
}

impl<P: IoPrimitive, V> BlockingIter<P, V> {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cell.cancel_handle()
    }

    pub fn into_inner(self) -> Cell<P, V> {
        self.cell
    }
}

impl<P: IoPrimitive, V> Iterator for BlockingIter<P, V> {
    type Item = Result<Batch<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.cell.next_batch())
    }
}

impl<P: IoPrimitive, V> fmt::Debug for BlockingIter<P, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingIter")
            .field("cell", &self.cell)
            .finish_non_exhaustive()
    }
}
