//! Bounded polling shared by drivers and the condition evaluator

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Default interval between polls of a bounded wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Calls `probe` until it yields `Some` or `timeout` elapses.
///
/// The probe always runs at least once, so a zero timeout is a single check.
/// The last sleep is clipped to the remaining time.
pub async fn poll_until<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        sleep(interval.min(deadline - now)).await;
    }
}
