// Proactive refresh scheduling
// One cancellable delayed task at a time

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Default time before expiry at which the refresh fires
pub const DEFAULT_SAFETY_MARGIN_SECS: u64 = 60;

/// Delay until a refresh should run: `expires_at - now - margin`, never negative.
///
/// A zero delay means the token is already inside the margin and the refresh
/// must fire right away.
pub fn refresh_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, margin: Duration) -> Duration {
    (expires_at - now)
        .to_std()
        .ok()
        .and_then(|remaining| remaining.checked_sub(margin))
        .unwrap_or(Duration::ZERO)
}

/// Holds the single pending refresh task
pub struct RefreshScheduler {
    safety_margin: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            safety_margin,
            handle: Mutex::new(None),
        }
    }

    /// Delay for a token expiring at `expires_at`, measured from now
    pub fn delay_until(&self, expires_at: DateTime<Utc>) -> Duration {
        refresh_delay(expires_at, Utc::now(), self.safety_margin)
    }

    /// Run `task` after `delay`, cancelling whatever was pending before
    pub async fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock().await;
        if let Some(previous) = handle.take() {
            previous.abort();
        }

        tracing::debug!(delay_ms = delay.as_millis() as u64, "Scheduling token refresh");
        *handle = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        }));
    }

    /// Cancel the pending task; no-op when nothing is scheduled
    pub async fn stop(&self) {
        if let Some(previous) = self.handle.lock().await.take() {
            previous.abort();
            tracing::debug!("Cancelled scheduled token refresh");
        }
    }

    /// Whether a task is scheduled and has not finished
    pub async fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_refresh_delay_subtracts_margin() {
        let now = Utc::now();
        let exp = now + chrono::Duration::seconds(300);
        assert_eq!(
            refresh_delay(exp, now, Duration::from_secs(60)),
            Duration::from_secs(240)
        );
    }

    #[test]
    fn test_refresh_delay_inside_margin_is_zero() {
        let now = Utc::now();
        let exp = now + chrono::Duration::seconds(30);
        assert_eq!(refresh_delay(exp, now, Duration::from_secs(60)), Duration::ZERO);

        let expired = now - chrono::Duration::seconds(30);
        assert_eq!(refresh_delay(expired, now, Duration::from_secs(60)), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_refresh_delay_never_exceeds_remaining(remaining in -10_000i64..100_000, margin in 0u64..3_600) {
            let now = Utc::now();
            let exp = now + chrono::Duration::seconds(remaining);
            let delay = refresh_delay(exp, now, Duration::from_secs(margin));
            let expected = (remaining - margin as i64).max(0) as u64;
            prop_assert_eq!(delay, Duration::from_secs(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_fires_after_delay() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(60));
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(Duration::from_secs(10), counting_task(&counter))
            .await;
        assert!(scheduler.is_pending().await);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_fires_immediately() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(60));
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.schedule(Duration::ZERO, counting_task(&counter)).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_schedule_replaces_first() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(60));
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(Duration::from_secs(5), counting_task(&counter))
            .await;
        scheduler
            .schedule(Duration::from_secs(5), counting_task(&counter))
            .await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(60));
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler
            .schedule(Duration::from_secs(5), counting_task(&counter))
            .await;
        scheduler.stop().await;
        scheduler.stop().await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_pending().await);
    }

    #[tokio::test]
    async fn test_stop_without_pending_is_noop() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(60));
        scheduler.stop().await;
        assert!(!scheduler.is_pending().await);
    }
}
