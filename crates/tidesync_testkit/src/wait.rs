//! Polling and event helpers for asynchronous assertions.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition held.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = async {
        loop {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}

/// Awaits `future` for at most `timeout`.
///
/// Returns `None` if it did not complete in time.
pub async fn within<F: Future>(timeout: Duration, future: F) -> Option<F::Output> {
    tokio::time::timeout(timeout, future).await.ok()
}

/// Receives the next event, or `None` on timeout or a closed channel.
pub async fn next_event<T: Clone>(
    receiver: &mut broadcast::Receiver<T>,
    timeout: Duration,
) -> Option<T> {
    within(timeout, receiver.recv()).await.and_then(Result::ok)
}

/// Drains every event already buffered on `receiver`.
pub fn drain<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn eventually_sees_condition() {
        let calls = AtomicUsize::new(0);
        let held = eventually(Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;
        assert!(held);
    }

    #[tokio::test(start_paused = true)]
    async fn eventually_times_out() {
        assert!(!eventually(Duration::from_millis(50), || false).await);
    }

    #[tokio::test]
    async fn drain_collects_buffered_events() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(drain(&mut rx), vec![1, 2]);
        assert_eq!(next_event(&mut rx, Duration::from_millis(10)).await, None);
    }
}
