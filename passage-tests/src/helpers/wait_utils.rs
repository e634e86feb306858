//! Polling helpers for asynchronous assertions.

use std::time::Duration;

/// Poll `probe` until it returns true or `deadline` elapses. Returns the
/// final probe result, so callers can simply assert on it.
pub async fn wait_for(mut probe: impl FnMut() -> bool, deadline: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    probe()
}
