#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use cellulario::config::{CellConfig, CellSection, RawCellConfig, TierSection};
use cellulario::tier::{from_fn, BoxTask, IoRequest, Step};
use cellulario::types::{FailurePolicy, StrategyKind};

/// Task type matching [`FakePrimitive`](crate::FakePrimitive): string
/// requests, string responses, string outputs.
pub type FakeTask = BoxTask<String, String, String>;

/// Yields one request, then emits its response.
pub fn echo_task(payload: &str) -> FakeTask {
    batch_task(&[payload])
}

/// Yields all `payloads` as one batch, then emits the responses in batch
/// order.
pub fn batch_task(payloads: &[&str]) -> FakeTask {
    let requests: Vec<String> = payloads.iter().map(|p| p.to_string()).collect();
    let mut sent = false;
    from_fn(move |incoming: Vec<String>| {
        if sent {
            return Step::Done(incoming);
        }
        sent = true;
        Step::Requests(requests.iter().cloned().map(IoRequest::new).collect())
    })
}

/// Yields one request at a time, then emits every response.
pub fn sequential_task(payloads: &[&str]) -> FakeTask {
    let mut remaining: Vec<String> = payloads.iter().rev().map(|p| p.to_string()).collect();
    let mut collected = Vec::new();
    from_fn(move |incoming: Vec<String>| {
        collected.extend(incoming);
        match remaining.pop() {
            Some(next) => Step::Requests(vec![IoRequest::new(next)]),
            None => Step::Done(std::mem::take(&mut collected)),
        }
    })
}

/// Yields requests carrying explicit size estimates and targets.
pub fn sized_task(requests: Vec<IoRequest<String>>) -> FakeTask {
    let mut requests = Some(requests);
    from_fn(move |incoming: Vec<String>| match requests.take() {
        Some(batch) => Step::Requests(batch),
        None => Step::Done(incoming),
    })
}

/// Emits `values` without doing any IO.
pub fn emit_task(values: &[&str]) -> FakeTask {
    let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    from_fn(move |_: Vec<String>| Step::Done(values.clone()))
}

/// Fails on its first advance.
pub fn failing_task(message: &str) -> FakeTask {
    let message = message.to_string();
    from_fn(move |_: Vec<String>| Step::Failed(anyhow!(message.clone())))
}

/// Yields one request, then fails once the response arrives.
pub fn fail_after_request(payload: &str) -> FakeTask {
    let payload = payload.to_string();
    let mut sent = false;
    from_fn(move |_: Vec<String>| {
        if sent {
            return Step::Failed(anyhow!("'{payload}' answered but task failed"));
        }
        sent = true;
        Step::Requests(vec![IoRequest::new(payload.clone())])
    })
}

/// Yields without requests `times` times, then emits `value`.
pub fn yielding_task(times: usize, value: &str) -> FakeTask {
    let value = value.to_string();
    let mut left = times;
    from_fn(move |_: Vec<String>| {
        if left == 0 {
            return Step::Done(vec![value.clone()]);
        }
        left -= 1;
        Step::Requests(Vec::new())
    })
}

/// Inputs received by downstream tasks, one entry per spawned task.
pub type SeenInputs = Arc<Mutex<Vec<Vec<String>>>>;

/// Spawner for a consumer tier: records each input unit, then requests
/// `"<value>/<suffix>"` for every value and emits the responses.
pub fn recording_spawner(
    seen: SeenInputs,
    suffix: &'static str,
) -> impl FnMut(Vec<String>) -> FakeTask + Send + 'static {
    move |input: Vec<String>| {
        seen.lock().unwrap().push(input.clone());
        let payloads: Vec<String> = input.iter().map(|v| format!("{v}/{suffix}")).collect();
        let refs: Vec<&str> = payloads.iter().map(String::as_str).collect();
        batch_task(&refs)
    }
}

/// Spawner for a consumer tier that passes its input through unchanged.
pub fn passthrough_spawner() -> impl FnMut(Vec<String>) -> FakeTask + Send + 'static {
    |input: Vec<String>| from_fn(move |_: Vec<String>| Step::Done(input.clone()))
}

/// Builder for `CellConfig` to simplify test setup.
pub struct CellConfigBuilder {
    config: RawCellConfig,
}

impl CellConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawCellConfig {
                cell: CellSection::default(),
                tier: BTreeMap::new(),
            },
        }
    }

    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.config.cell.strategy = strategy;
        self
    }

    pub fn buffered(mut self, batch_size: usize) -> Self {
        self.config.cell.buffering = true;
        self.config.cell.batch_size = batch_size;
        self
    }

    pub fn gathering(mut self, gathering: bool) -> Self {
        self.config.cell.gathering = gathering;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.cell.failure_policy = policy;
        self
    }

    pub fn root(mut self, name: &str) -> Self {
        self.config.tier.insert(name.to_string(), TierSection::default());
        self
    }

    pub fn consumer(mut self, name: &str, source: &str) -> Self {
        self.config.tier.insert(
            name.to_string(),
            TierSection {
                source: Some(source.to_string()),
                concurrency: None,
            },
        );
        self
    }

    pub fn concurrency(mut self, name: &str, cap: usize) -> Self {
        self.config.tier.entry(name.to_string()).or_default().concurrency = Some(cap);
        self
    }

    pub fn raw(self) -> RawCellConfig {
        self.config
    }

    pub fn build(self) -> CellConfig {
        CellConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for CellConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
