pub mod builders;
pub mod fake_executor;

use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Tracing setup shared by the datapipe test suites.
///
/// Honors the same `DATAPIPE_LOG` variable as the binary (default `info`)
/// and writes through the test writer, so output surfaces only for failing
/// tests unless the harness runs with `-- --nocapture`. Safe to call from
/// every test; only the first call installs the subscriber.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("DATAPIPE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Bound a future so a stuck scheduler fails the test instead of hanging
/// the suite. Ten seconds covers the slowest legitimate path: a
/// config-built pipeline ticking at a one-second window over real child
/// processes.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("test exceeded the 10s scheduler deadline")
}
