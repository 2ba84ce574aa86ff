// src/io/spawned.rs

//! An [`IoPrimitive`] that runs each request as a future on tokio.
//!
//! Requests are boxed futures supplied by tasks (an HTTP call, a file read,
//! a timer...). Each is spawned in its own Tokio task; completions are
//! reported back over an mpsc channel, and cancellation aborts the spawned
//! task so no completion is ever reported for it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::primitive::{IoPrimitive, Ready, ReadyFuture, Token};

/// A request for [`SpawnedPrimitive`].
pub type IoFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Box a future as an [`IoFuture`].
pub fn io_future<T, F>(fut: F) -> IoFuture<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
{
    Box::pin(fut)
}

/// Runs request futures on the ambient Tokio runtime.
///
/// Responses are `anyhow::Result<T>`: a failing request is data for the task
/// that issued it, not a fatal primitive error.
pub struct SpawnedPrimitive<T> {
    next_token: u64,
    tx: mpsc::Sender<(Token, Result<T>)>,
    rx: mpsc::Receiver<(Token, Result<T>)>,
    active: HashMap<Token, JoinHandle<()>>,
}

impl<T: Send + 'static> SpawnedPrimitive<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            next_token: 0,
            tx,
            rx,
            active: HashMap::new(),
        }
    }

    /// Number of spawned requests that have not reported back.
    pub fn active(&self) -> usize {
        self.active.len()
    }
}

impl<T: Send + 'static> Default for SpawnedPrimitive<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> IoPrimitive for SpawnedPrimitive<T> {
    type Request = IoFuture<T>;
    type Response = Result<T>;

    fn submit(&mut self, request: Self::Request) -> Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let outcome = request.await;
            // The receiver only goes away with the primitive itself.
            let _ = tx.send((token, outcome)).await;
        });
        self.active.insert(token, handle);
        debug!(%token, "spawned request future");
        Ok(token)
    }

    fn cancel(&mut self, token: Token) -> Result<()> {
        match self.active.remove(&token) {
            Some(handle) => {
                handle.abort();
                debug!(%token, "aborted request future");
            }
            None => debug!(%token, "cancel for a request that already finished"),
        }
        Ok(())
    }

    fn wait_ready(&mut self) -> ReadyFuture<'_, Self::Response> {
        Box::pin(async move {
            let first = self
                .rx
                .recv()
                .await
                .ok_or_else(|| anyhow!("completion channel closed"))?;

            let mut ready: Ready<Result<T>> = vec![first];
            while let Ok(next) = self.rx.try_recv() {
                ready.push(next);
            }

            // A request cancelled after it already reported is still in the
            // channel; drop it so cancelled requests never surface.
            ready.retain(|(token, _)| self.active.remove(token).is_some());
            Ok(ready)
        })
    }

    fn close(&mut self) {
        for (_, handle) in self.active.drain() {
            handle.abort();
        }
    }
}
