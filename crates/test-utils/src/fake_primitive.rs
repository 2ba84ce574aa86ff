use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use cellulario::io::{IoPrimitive, ReadyFuture, Token};

/// Everything the fake primitive was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveEvent {
    Open,
    Submit(Token, String),
    Cancel(Token),
    Complete(Token, String),
    Close,
}

/// Shared view of a [`FakePrimitive`]'s activity, usable after the
/// primitive has moved into a cell.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveLog(Arc<Mutex<Vec<PrimitiveEvent>>>);

impl PrimitiveLog {
    fn push(&self, event: PrimitiveEvent) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<PrimitiveEvent> {
        self.0.lock().unwrap().clone()
    }

    /// Payloads in submission order.
    pub fn submitted(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PrimitiveEvent::Submit(_, payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<Token> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PrimitiveEvent::Cancel(token) => Some(token),
                _ => None,
            })
            .collect()
    }

    /// Payloads of requests that were reported complete, in order.
    pub fn completed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PrimitiveEvent::Complete(_, payload) => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn token_of(&self, payload: &str) -> Option<Token> {
        self.events().into_iter().find_map(|e| match e {
            PrimitiveEvent::Submit(token, p) if p == payload => Some(token),
            _ => None,
        })
    }

    pub fn count(&self, wanted: &PrimitiveEvent) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }
}

/// Which pending requests a `wait_ready` call completes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionOrder {
    /// Oldest submission first.
    #[default]
    Fifo,
    /// Newest submission first.
    Reverse,
}

type Responder = Box<dyn FnMut(&str) -> String + Send>;
type Holder = Box<dyn Fn(&str) -> bool + Send>;

/// A scripted IO primitive: requests and responses are strings.
///
/// - Responses are `"<payload>!"` unless a responder is installed.
/// - `wait_ready` completes up to `per_wait` pending requests, in the
///   configured order, skipping requests matched by `hold`.
/// - Every call is recorded in a [`PrimitiveLog`].
pub struct FakePrimitive {
    next_token: u64,
    pending: VecDeque<(Token, String)>,
    log: PrimitiveLog,
    order: CompletionOrder,
    per_wait: usize,
    responder: Responder,
    hold: Option<Holder>,
    fail_submit_after: Option<usize>,
    submits: usize,
}

impl FakePrimitive {
    pub fn new() -> Self {
        Self {
            next_token: 0,
            pending: VecDeque::new(),
            log: PrimitiveLog::default(),
            order: CompletionOrder::Fifo,
            per_wait: usize::MAX,
            responder: Box::new(|payload| format!("{payload}!")),
            hold: None,
            fail_submit_after: None,
            submits: 0,
        }
    }

    pub fn log(&self) -> PrimitiveLog {
        self.log.clone()
    }

    pub fn order(mut self, order: CompletionOrder) -> Self {
        self.order = order;
        self
    }

    /// Complete at most `n` requests per `wait_ready`.
    pub fn per_wait(mut self, n: usize) -> Self {
        self.per_wait = n.max(1);
        self
    }

    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: FnMut(&str) -> String + Send + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    /// Never complete requests whose payload matches `hold`.
    pub fn hold<F>(mut self, hold: F) -> Self
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        self.hold = Some(Box::new(hold));
        self
    }

    /// Fail every submission after the first `n`.
    pub fn fail_submit_after(mut self, n: usize) -> Self {
        self.fail_submit_after = Some(n);
        self
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn is_held(&self, payload: &str) -> bool {
        self.hold.as_ref().is_some_and(|hold| hold(payload))
    }
}

impl Default for FakePrimitive {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPrimitive for FakePrimitive {
    type Request = String;
    type Response = String;

    fn open(&mut self) -> anyhow::Result<()> {
        self.log.push(PrimitiveEvent::Open);
        Ok(())
    }

    fn submit(&mut self, request: String) -> anyhow::Result<Token> {
        if self.fail_submit_after.is_some_and(|n| self.submits >= n) {
            bail!("fake submit failure for '{request}'");
        }
        self.submits += 1;

        let token = Token(self.next_token);
        self.next_token += 1;
        self.log.push(PrimitiveEvent::Submit(token, request.clone()));
        self.pending.push_back((token, request));
        Ok(token)
    }

    fn cancel(&mut self, token: Token) -> anyhow::Result<()> {
        self.log.push(PrimitiveEvent::Cancel(token));
        self.pending.retain(|(t, _)| *t != token);
        Ok(())
    }

    fn wait_ready(&mut self) -> ReadyFuture<'_, String> {
        Box::pin(async move {
            let mut ready = Vec::new();
            let mut kept = VecDeque::new();

            while ready.len() < self.per_wait {
                let next = match self.order {
                    CompletionOrder::Fifo => self.pending.pop_front(),
                    CompletionOrder::Reverse => self.pending.pop_back(),
                };
                let Some((token, payload)) = next else {
                    break;
                };
                if self.is_held(&payload) {
                    kept.push_back((token, payload));
                    continue;
                }
                let response = (self.responder)(&payload);
                self.log.push(PrimitiveEvent::Complete(token, payload));
                ready.push((token, response));
            }

            match self.order {
                CompletionOrder::Fifo => {
                    kept.extend(self.pending.drain(..));
                    self.pending = kept;
                }
                CompletionOrder::Reverse => {
                    // `kept` was filled newest first.
                    self.pending.extend(kept.into_iter().rev());
                }
            }

            if ready.is_empty() {
                return Err(anyhow!("fake primitive has no completable requests"));
            }
            Ok(ready)
        })
    }

    fn close(&mut self) {
        self.log.push(PrimitiveEvent::Close);
    }
}
