// tests/scenarios.rs

use std::error::Error;
use std::sync::{Arc, Mutex};

use cellulario::engine::{Cell, CellOptions, CellState};
use cellulario::errors::CellError;
use cellulario::tier::Tier;
use cellulario_test_utils::builders::{
    batch_task, echo_task, fail_after_request, failing_task, recording_spawner, SeenInputs,
};
use cellulario_test_utils::{init_tracing, with_timeout, CompletionOrder, FakePrimitive, PrimitiveEvent};

type TestResult = Result<(), Box<dyn Error>>;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Single FIFO tier, three tasks each yielding one request.
#[tokio::test]
async fn fifo_single_tier_dispatches_and_delivers_in_order() -> TestResult {
    init_tracing();

    // Completing newest-first must not change the delivery order.
    let primitive = FakePrimitive::new().order(CompletionOrder::Reverse).per_wait(1);
    let log = primitive.log();

    let mut cell = Cell::new(primitive, CellOptions::default());
    cell.add_tier(Tier::new("t0").tasks([echo_task("A"), echo_task("B"), echo_task("C")]))?;

    let mut delivered = Vec::new();
    with_timeout(cell.run(|batch| delivered.extend(batch))).await?;

    assert_eq!(log.submitted(), strings(&["A", "B", "C"]));
    assert_eq!(log.completed(), strings(&["C", "B", "A"]));
    assert_eq!(delivered, strings(&["A!", "B!", "C!"]));
    assert_eq!(cell.state(), CellState::Closed);
    Ok(())
}

/// T1 sees x1, x2, y1 in producer order even when y1 completes first.
#[tokio::test]
async fn downstream_tier_observes_producer_order() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new().order(CompletionOrder::Reverse).per_wait(1);
    let log = primitive.log();
    let seen: SeenInputs = Arc::new(Mutex::new(Vec::new()));

    let mut cell = Cell::new(primitive, CellOptions::default());
    cell.add_tier(Tier::new("t0").tasks([batch_task(&["x1", "x2"]), batch_task(&["y1"])]))?;
    cell.append_tier(Tier::new("t1").spawn_with(recording_spawner(Arc::clone(&seen), "t1")))?;

    let mut delivered = Vec::new();
    with_timeout(cell.run(|batch| delivered.extend(batch))).await?;

    // y1 was answered before x1 and x2.
    let completed = log.completed();
    let pos = |p: &str| completed.iter().position(|c| c == p).unwrap();
    assert!(pos("y1") < pos("x1"));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![strings(&["x1!"]), strings(&["x2!"]), strings(&["y1!"])]
    );
    assert_eq!(delivered, strings(&["x1!/t1!", "x2!/t1!", "y1!/t1!"]));
    Ok(())
}

/// Fail-fast: an exhausted tier aborts the run before its consumer gets
/// anything, cancelling whatever is still in flight.
#[tokio::test]
async fn fail_fast_aborts_and_cancels_outstanding_requests() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new().hold(|payload| payload == "slow");
    let log = primitive.log();
    let seen: SeenInputs = Arc::new(Mutex::new(Vec::new()));

    let mut cell = Cell::new(primitive, CellOptions::default().fail_fast());
    cell.add_tier(Tier::new("t0").tasks([fail_after_request("f1"), fail_after_request("f2")]))?;
    cell.append_tier(Tier::new("t1").spawn_with(recording_spawner(Arc::clone(&seen), "t1")))?;
    cell.add_tier(Tier::new("slow").task(echo_task("slow")))?;

    let mut delivered = Vec::new();
    let err = with_timeout(cell.run(|batch| delivered.extend(batch)))
        .await
        .expect_err("fail-fast run must abort");

    match err {
        CellError::Aborted(abort) => {
            assert_eq!(abort.tier, "t0");
            assert_eq!(abort.cause.failed, 2);
            assert_eq!(abort.cancelled, 1);
        }
        other => panic!("expected CellAbortError, got {other:?}"),
    }

    assert!(delivered.is_empty());
    assert!(seen.lock().unwrap().is_empty());
    let slow = log.token_of("slow").expect("slow request was submitted");
    assert_eq!(log.cancelled(), vec![slow]);
    assert_eq!(log.count(&PrimitiveEvent::Close), 1);
    assert_eq!(cell.state(), CellState::Closed);

    // The abort is reported once; afterwards the cell is simply closed.
    assert!(cell.next_batch().await.is_none());
    Ok(())
}

/// Fail-soft: the run drains, delivering what succeeded, then reports every
/// task failure at once.
#[tokio::test]
async fn fail_soft_delivers_successes_and_aggregates_failures() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new();
    let mut cell = Cell::new(primitive, CellOptions::default());
    let t0 = cell.add_tier(Tier::new("t0").tasks([
        echo_task("a"),
        failing_task("broken pipe"),
        echo_task("c"),
    ]))?;

    let mut delivered = Vec::new();
    let err = with_timeout(cell.run(|batch| delivered.extend(batch)))
        .await
        .expect_err("failed task must surface");

    assert_eq!(delivered, strings(&["a!", "c!"]));
    match err {
        CellError::Aggregate(agg) => {
            assert_eq!(agg.errors.len(), 1);
            assert_eq!(agg.errors[0].tier, "t0");
            assert!(agg.errors[0].cause.to_string().contains("broken pipe"));
            assert!(agg.exhausted.is_empty());
        }
        other => panic!("expected AggregateError, got {other:?}"),
    }

    let stats = cell.tier_stats(t0).expect("tier exists");
    assert_eq!((stats.admitted, stats.succeeded, stats.failed), (3, 2, 1));
    assert!(stats.drained && !stats.exhausted);

    // Idempotent drain: nothing is re-delivered, no error is repeated.
    let mut again = Vec::new();
    cell.run(|batch| again.extend(batch)).await?;
    assert!(again.is_empty());
    Ok(())
}
