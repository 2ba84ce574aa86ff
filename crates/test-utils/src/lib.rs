//! Shared tooling for cellulario's tests: a scripted IO primitive, task and
//! config builders, and the tracing/timeout helpers every suite uses.

pub mod builders;
pub mod fake_primitive;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

pub use fake_primitive::{CompletionOrder, FakePrimitive, PrimitiveEvent, PrimitiveLog};

/// Upper bound for any single cell run in a test. A cell that stalls or
/// waits on a request nobody completes trips this instead of hanging CI.
pub const CELL_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Install a test-captured tracing subscriber once per test binary.
///
/// The filter comes from `CELLULARIO_LOG` (the variable the library's own
/// `init_logging` reads), then `RUST_LOG`, then `warn`. Captured output is
/// only shown for failing tests, e.g.
/// `CELLULARIO_LOG=cellulario=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(cellulario::logging::LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await a cell operation, panicking if it outlives [`CELL_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(CELL_TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("cell did not settle within {CELL_TIMEOUT:?}"))
}
