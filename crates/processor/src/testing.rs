//! Helpers for the unit tests in this crate.

use std::time::Duration;

use tokio::time::Instant;

/// Poll `done` until it holds; fails the test after two seconds.
pub(crate) async fn eventually(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let every spawned task run until it blocks.
pub(crate) async fn run_pending_tasks() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
