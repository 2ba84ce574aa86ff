// src/io/primitive.rs

//! Boundary to the IO primitive that actually performs requests.
//!
//! The cell talks to an `IoPrimitive` instead of doing any IO itself. This
//! makes it easy to swap in a scripted primitive in tests while production
//! code plugs in a real multiplexer (or [`SpawnedPrimitive`](super::SpawnedPrimitive)).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;

/// Handle the primitive hands out for a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tok{}", self.0)
    }
}

/// Completions reported by one `wait_ready` call.
pub type Ready<S> = Vec<(Token, S)>;

pub type ReadyFuture<'a, S> = Pin<Box<dyn Future<Output = Result<Ready<S>>> + Send + 'a>>;

/// Trait abstracting the underlying IO multiplexer.
///
/// Every error returned from these methods is fatal to the run.
pub trait IoPrimitive: Send {
    type Request: Send;
    type Response: Send;

    /// Called when the cell starts running.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Start performing a request.
    fn submit(&mut self, request: Self::Request) -> Result<Token>;

    /// Abandon a submitted request. Its completion must not be reported.
    fn cancel(&mut self, token: Token) -> Result<()>;

    /// Wait until at least one submitted request has completed.
    ///
    /// Only called while requests are outstanding.
    fn wait_ready(&mut self) -> ReadyFuture<'_, Self::Response>;

    /// Called once when the cell closes, aborts or fails.
    fn close(&mut self) {}
}
