// src/errors.rs

//! Crate-wide error types.
//!
//! Task failures are recorded per tier and only surface once the cell has
//! drained (as an [`AggregateError`]) or, under fail-fast, when a tier is
//! exhausted (as a [`CellAbortError`]). Failures of the IO primitive are
//! always fatal.

use std::fmt;

use thiserror::Error;

use crate::tier::TaskId;

/// A single task failed.
#[derive(Error, Debug)]
#[error("task {task} in tier '{tier}' failed: {cause}")]
pub struct TaskError {
    pub tier: String,
    pub task: TaskId,
    pub cause: anyhow::Error,
}

/// Every task admitted by a tier failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("tier '{tier}' exhausted: all {failed} task(s) failed")]
pub struct TierExhaustedError {
    pub tier: String,
    pub failed: usize,
}

/// The fail-fast policy aborted the cell after a tier was exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cell aborted ({cancelled} in-flight request(s) cancelled): {cause}")]
pub struct CellAbortError {
    pub tier: String,
    pub cancelled: usize,
    #[source]
    pub cause: TierExhaustedError,
}

/// Every task failure recorded during a run that was allowed to drain.
#[derive(Error, Debug)]
pub struct AggregateError {
    pub errors: Vec<TaskError>,
    /// Names of tiers in which every task failed.
    pub exhausted: Vec<String>,
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.errors.len())?;
        if !self.exhausted.is_empty() {
            write!(f, " (exhausted tiers: {})", self.exhausted.join(", "))?;
        }
        for err in &self.errors {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

/// Which IO primitive operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveOp {
    Open,
    Submit,
    Cancel,
    Wait,
}

impl fmt::Display for PrimitiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimitiveOp::Open => "open",
            PrimitiveOp::Submit => "submit",
            PrimitiveOp::Cancel => "cancel",
            PrimitiveOp::Wait => "wait_ready",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum CellError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in tier graph: {0}")]
    TierCycle(String),

    #[error("Invalid tier layout: {0}")]
    TierLayout(String),

    #[error(transparent)]
    Aborted(#[from] CellAbortError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("IO primitive {op} failed: {source}")]
    Primitive {
        op: PrimitiveOp,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CellError {
    pub(crate) fn primitive(op: PrimitiveOp, source: anyhow::Error) -> Self {
        CellError::Primitive { op, source }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CellError>;
