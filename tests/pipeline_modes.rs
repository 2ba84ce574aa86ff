// tests/pipeline_modes.rs

use std::error::Error;
use std::sync::{Arc, Mutex};

use cellulario::engine::{Cell, CellOptions};
use cellulario::errors::CellError;
use cellulario::tier::{IoRequest, Tier, TierId};
use cellulario::types::StrategyKind;
use cellulario_test_utils::builders::{
    echo_task, emit_task, passthrough_spawner, recording_spawner, sequential_task, sized_task,
    yielding_task, SeenInputs,
};
use cellulario_test_utils::{init_tracing, with_timeout, CompletionOrder, FakePrimitive, PrimitiveEvent};

type TestResult = Result<(), Box<dyn Error>>;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

async fn collect_batches(cell: &mut Cell<FakePrimitive, String>) -> Result<Vec<Vec<String>>, CellError> {
    let mut batches = Vec::new();
    with_timeout(cell.run(|batch| batches.push(batch))).await?;
    Ok(batches)
}

#[tokio::test]
async fn gathering_delivers_in_completion_order() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new().order(CompletionOrder::Reverse).per_wait(1);
    let mut cell = Cell::new(primitive, CellOptions::default().gathering(true));
    cell.add_tier(Tier::new("t0").tasks([echo_task("a"), echo_task("b"), echo_task("c")]))?;

    let batches = collect_batches(&mut cell).await?;
    assert_eq!(batches, vec![strings(&["c!"]), strings(&["b!"]), strings(&["a!"])]);
    Ok(())
}

#[tokio::test]
async fn buffering_delivers_full_batches_then_one_partial() -> TestResult {
    init_tracing();

    let mut cell = Cell::new(FakePrimitive::new(), CellOptions::default().buffered(2));
    cell.add_tier(Tier::new("t0").tasks([emit_task(&["a", "b", "c"]), emit_task(&["d", "e"])]))?;

    let batches = collect_batches(&mut cell).await?;
    assert_eq!(
        batches,
        vec![strings(&["a", "b"]), strings(&["c", "d"]), strings(&["e"])]
    );
    Ok(())
}

#[tokio::test]
async fn buffered_units_feed_one_downstream_task_each() -> TestResult {
    init_tracing();

    let seen: SeenInputs = Arc::new(Mutex::new(Vec::new()));
    let mut cell = Cell::new(FakePrimitive::new(), CellOptions::default().buffered(2));
    cell.add_tier(Tier::new("t0").tasks([emit_task(&["a", "b", "c"]), emit_task(&["d", "e"])]))?;
    cell.append_tier(Tier::new("t1").spawn_with(recording_spawner(Arc::clone(&seen), "t1")))?;

    let batches = collect_batches(&mut cell).await?;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![strings(&["a", "b"]), strings(&["c", "d"]), strings(&["e"])]
    );
    let (last, full) = batches.split_last().expect("at least one batch");
    assert!(full.iter().all(|b| b.len() == 2));
    assert!(!last.is_empty() && last.len() <= 2);
    let flat: Vec<String> = batches.concat();
    assert_eq!(flat, strings(&["a/t1!", "b/t1!", "c/t1!", "d/t1!", "e/t1!"]));
    Ok(())
}

#[tokio::test]
async fn buffering_and_gathering_combine() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new().order(CompletionOrder::Reverse).per_wait(1);
    let options = CellOptions::default().gathering(true).buffered(2);
    let mut cell = Cell::new(primitive, options);
    cell.add_tier(Tier::new("t0").tasks([echo_task("a"), echo_task("b"), echo_task("c")]))?;

    let batches = collect_batches(&mut cell).await?;
    assert_eq!(batches, vec![strings(&["c!", "b!"]), strings(&["a!"])]);
    Ok(())
}

#[tokio::test]
async fn three_stage_pipeline_preserves_order() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new().order(CompletionOrder::Reverse).per_wait(2);
    let mut cell = Cell::new(primitive, CellOptions::default());
    cell.add_tier(Tier::new("fetch").tasks([
        sequential_task(&["p1", "p2"]),
        echo_task("q"),
    ]))?;
    cell.append_tier(Tier::new("parse").spawn_with(passthrough_spawner()))?;
    let seen: SeenInputs = Arc::new(Mutex::new(Vec::new()));
    cell.append_tier(Tier::new("store").spawn_with(recording_spawner(Arc::clone(&seen), "db")))?;

    let batches = collect_batches(&mut cell).await?;
    assert_eq!(
        batches.concat(),
        strings(&["p1!/db!", "p2!/db!", "q!/db!"])
    );
    assert_eq!(seen.lock().unwrap().len(), 3);
    Ok(())
}

#[tokio::test]
async fn concurrency_cap_serialises_a_tier() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new();
    let log = primitive.log();
    let mut cell = Cell::new(primitive, CellOptions::default());
    cell.add_tier(
        Tier::new("t0")
            .tasks([echo_task("a"), echo_task("b"), echo_task("c")])
            .concurrency(1),
    )?;

    collect_batches(&mut cell).await?;

    let kinds: Vec<&str> = log
        .events()
        .iter()
        .filter_map(|e| match e {
            PrimitiveEvent::Submit(..) => Some("submit"),
            PrimitiveEvent::Complete(..) => Some("complete"),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["submit", "complete", "submit", "complete", "submit", "complete"]
    );
    Ok(())
}

#[tokio::test]
async fn bandwidth_dispatches_largest_target_group_first() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new();
    let log = primitive.log();
    let options = CellOptions::default().strategy(StrategyKind::Bandwidth);
    let mut cell = Cell::new(primitive, options);

    let req = |payload: &str, target: &str| IoRequest::new(payload.to_string()).target(target);
    cell.add_tier(Tier::new("t0").task(sized_task(vec![
        req("s1", "a"),
        req("s2", "b"),
        req("c1", "c"),
        req("c2", "c"),
        req("c3", "c"),
    ])))?;

    let batches = collect_batches(&mut cell).await?;
    assert_eq!(log.submitted(), strings(&["c1", "c2", "c3", "s1", "s2"]));
    // The task is resumed with responses in request order.
    assert_eq!(batches.concat(), strings(&["s1!", "s2!", "c1!", "c2!", "c3!"]));
    Ok(())
}

#[tokio::test]
async fn bandwidth_sends_shared_target_batch_before_large_single_request() -> TestResult {
    init_tracing();

    let primitive = FakePrimitive::new();
    let log = primitive.log();
    let mut cell = Cell::new(primitive, CellOptions::default().strategy(StrategyKind::Bandwidth));

    let shared = |payload: &str| IoRequest::new(payload.to_string()).target("c");
    cell.add_tier(Tier::new("t0").task(sized_task(vec![
        IoRequest::new("solo".to_string()).size(4),
        shared("c1"),
        shared("c2"),
        shared("c3"),
    ])))?;

    collect_batches(&mut cell).await?;
    assert_eq!(log.submitted(), strings(&["c1", "c2", "c3", "solo"]));
    Ok(())
}

#[tokio::test]
async fn yielding_tasks_are_resumed() -> TestResult {
    init_tracing();

    let mut cell = Cell::new(FakePrimitive::new(), CellOptions::default());
    cell.add_tier(Tier::new("t0").tasks([yielding_task(3, "y"), echo_task("a")]))?;

    let batches = collect_batches(&mut cell).await?;
    assert_eq!(batches.concat(), strings(&["y", "a!"]));
    Ok(())
}

#[tokio::test]
async fn explicit_sources_and_layout_errors() -> TestResult {
    init_tracing();

    let mut cell: Cell<FakePrimitive, String> = Cell::new(FakePrimitive::new(), CellOptions::default());
    let err = cell
        .append_tier(Tier::new("orphan").spawn_with(passthrough_spawner()))
        .unwrap_err();
    assert!(matches!(err, CellError::TierLayout(_)));

    let left = cell.add_tier(Tier::new("left").task(emit_task(&["l"])))?;
    let right = cell.add_tier(Tier::new("right").task(emit_task(&["r"])))?;
    let consumer = cell.add_tier_from(left, Tier::new("consumer").spawn_with(passthrough_spawner()))?;

    let err = cell
        .add_tier_from(left, Tier::new("second").spawn_with(passthrough_spawner()))
        .unwrap_err();
    assert!(matches!(err, CellError::TierLayout(_)));
    let err = cell
        .add_tier_from(TierId(42), Tier::new("ghost").spawn_with(passthrough_spawner()))
        .unwrap_err();
    assert!(matches!(err, CellError::TierLayout(_)));

    let stats = cell.tier_stats(consumer).expect("consumer exists");
    assert_eq!(stats.upstream, Some(left));
    assert_eq!(cell.tier_stats(left).unwrap().downstream, Some(consumer));
    assert_eq!(cell.tier_stats(right).unwrap().downstream, None);

    let mut batches = collect_batches(&mut cell).await?.concat();
    batches.sort();
    assert_eq!(batches, strings(&["l", "r"]));

    let err = cell.add_tier(Tier::new("late")).unwrap_err();
    assert!(matches!(err, CellError::TierLayout(_)));
    Ok(())
}
