use std::future::Future;
use std::time::Instant;
use tracing::{debug, enabled, Level};

/// Run `fut`, logging how long it took when debug logging is on.
pub async fn timed<F: Future>(label: &str, fut: F) -> F::Output {
    if !enabled!(Level::DEBUG) {
        return fut.await;
    }
    let start = Instant::now();
    let output = fut.await;
    debug!("{} took {:.4} seconds to execute", label, start.elapsed().as_secs_f64());
    output
}
