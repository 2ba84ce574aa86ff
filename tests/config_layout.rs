// tests/config_layout.rs

use std::error::Error;
use std::fs;

use cellulario::config::{default_config_path, load_and_validate, load_from_path};
use cellulario::engine::Cell;
use cellulario::errors::CellError;
use cellulario::tier::{Tier, TierId};
use cellulario::types::{FailurePolicy, StrategyKind};
use cellulario_test_utils::builders::{echo_task, passthrough_spawner, CellConfigBuilder, FakeTask};
use cellulario_test_utils::{init_tracing, with_timeout, FakePrimitive, PrimitiveEvent};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

const LAYOUT: &str = r#"
[cell]
strategy = "latency"
failure_policy = "fail-fast"

[tier.fetch]
concurrency = 1

[tier.parse]
source = "fetch"
"#;

fn fetch_tier() -> Tier<String, String, String> {
    let tasks: Vec<FakeTask> = vec![echo_task("a"), echo_task("b")];
    Tier::new("fetch").tasks(tasks)
}

#[tokio::test]
async fn layout_file_drives_cell_construction() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let path = dir.path().join("Cellulario.toml");
    fs::write(&path, LAYOUT)?;

    let raw = load_from_path(&path)?;
    assert_eq!(raw.tier.len(), 2);

    let config = load_and_validate(&path)?;
    assert_eq!(config.order(), ["fetch", "parse"]);
    let options = config.options();
    assert_eq!(options.strategy, StrategyKind::Latency);
    assert_eq!(options.failure_policy, FailurePolicy::FailFast);

    let primitive = FakePrimitive::new();
    let log = primitive.log();
    let mut cell = Cell::from_config(
        primitive,
        &config,
        [
            Tier::new("parse").spawn_with(passthrough_spawner()),
            fetch_tier(),
        ],
    )?;

    let fetch = cell.tier_stats(TierId(0)).expect("fetch laid out first");
    let parse = cell.tier_stats(TierId(1)).expect("parse laid out second");
    assert_eq!(fetch.name, "fetch");
    assert_eq!(parse.upstream, Some(TierId(0)));

    let mut delivered = Vec::new();
    with_timeout(cell.run(|batch| delivered.extend(batch))).await?;
    assert_eq!(delivered, vec!["a!".to_string(), "b!".to_string()]);

    // concurrency = 1 from the file: never two requests in flight.
    let mut in_flight = 0usize;
    for event in log.events() {
        match event {
            PrimitiveEvent::Submit(..) => {
                in_flight += 1;
                assert!(in_flight <= 1);
            }
            PrimitiveEvent::Complete(..) => in_flight -= 1,
            _ => {}
        }
    }
    Ok(())
}

#[test]
fn missing_and_extra_tiers_are_rejected() {
    init_tracing();

    let config = CellConfigBuilder::new()
        .root("fetch")
        .consumer("parse", "fetch")
        .build();

    let err = Cell::<FakePrimitive, String>::from_config(FakePrimitive::new(), &config, [fetch_tier()])
        .unwrap_err();
    assert!(matches!(err, CellError::ConfigError(_)));

    let err = Cell::<FakePrimitive, String>::from_config(
        FakePrimitive::new(),
        &config,
        [
            fetch_tier(),
            Tier::new("parse").spawn_with(passthrough_spawner()),
            Tier::new("extra"),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, CellError::ConfigError(_)));
}

#[test]
fn config_concurrency_must_be_positive_and_sources_acyclic() {
    let raw = CellConfigBuilder::new().root("a").concurrency("a", 0).raw();
    assert!(matches!(
        cellulario::config::CellConfig::try_from(raw),
        Err(CellError::ConfigError(_))
    ));

    let raw = CellConfigBuilder::new()
        .consumer("a", "b")
        .consumer("b", "a")
        .raw();
    assert!(matches!(
        cellulario::config::CellConfig::try_from(raw),
        Err(CellError::TierCycle(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().expect("tempdir");
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, CellError::IoError(_)));
    assert_eq!(default_config_path().to_str(), Some("Cellulario.toml"));
}
