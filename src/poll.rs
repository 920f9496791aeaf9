//! Cancellable fixed-interval polling.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Run `check` every `interval` until it yields a value or `cancel` fires.
///
/// The first check runs immediately. Returns `None` when cancelled.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tick.tick() => {
                if let Some(value) = check().await {
                    return Some(value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn returns_once_condition_holds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value = poll_until(Duration::from_millis(5), &CancellationToken::new(), || {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                (n >= 3).then_some(n)
            }
        })
        .await;
        assert_eq!(value, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let value: Option<()> =
            poll_until(Duration::from_millis(5), &cancel, || async { None }).await;
        assert_eq!(value, None);
    }
}
