//! Cancelable deferred callbacks on the Tokio runtime.
//!
//! Cancellation races firing: a callback that already started cannot be
//! recalled, so whatever it posts must be re-validated by the receiver.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Schedules callbacks after a delay.
#[derive(Debug, Clone)]
pub struct TimerService {
    runtime: Handle,
}

impl TimerService {
    /// Creates a service bound to the runtime the caller is running on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self {
            runtime: Handle::current(),
        }
    }

    /// Runs `callback` once `after` has elapsed, unless canceled first.
    pub fn schedule<F>(&self, after: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            callback();
        });
        TimerHandle { task, after }
    }
}

/// An armed timer. Dropping the handle cancels it.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
    after: Duration,
}

impl TimerHandle {
    /// Cancels the timer. Safe to call repeatedly and after it fired.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Returns `true` once the timer fired or was canceled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// The delay this timer was armed with.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.after
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicUsize::new(0));
        let hook = Arc::clone(&fired);
        (fired, move || {
            hook.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_fires_after_duration() {
        let timers = TimerService::current();
        let (fired, callback) = counter();
        let handle = timers.schedule(Duration::from_secs(5), callback);

        tokio::time::sleep(Duration::from_millis(4_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
        assert_eq!(handle.duration(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_timer_never_fires() {
        let timers = TimerService::current();
        let (fired, callback) = counter();
        let handle = timers.schedule(Duration::from_secs(1), callback);
        handle.cancel();
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_harmless() {
        let timers = TimerService::current();
        let (fired, callback) = counter();
        let handle = timers.schedule(Duration::from_millis(10), callback);

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels() {
        let timers = TimerService::current();
        let (fired, callback) = counter();
        drop(timers.schedule(Duration::from_secs(1), callback));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
