//! Cancellable one-shot timers.
//!
//! A timer is a spawned task that sleeps and then posts an event into the
//! owner's channel. The owner keeps the handle next to whatever the timer
//! guards (a debounce window, a pending ack) and cancels it when that
//! entry is retired. Cancelling is idempotent, and dropping a handle
//! cancels it.
//!
//! An event can already be queued when `cancel()` runs, so owners still
//! check the event against their current state before acting on it.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// A handle that is not armed.
    pub fn idle() -> Self {
        Self { task: None }
    }

    /// Post `event` into `tx` after `after`.
    pub fn arm<E: Send + 'static>(after: Duration, tx: &mpsc::UnboundedSender<E>, event: E) -> Self {
        let tx = tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(event);
        });
        Self { task: Some(task) }
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Still waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = tokio::time::Instant::now();
        let timer = TimerHandle::arm(Duration::from_millis(100), &tx, 7u32);
        assert!(timer.is_armed());

        assert_eq!(rx.recv().await, Some(7));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimerHandle::arm(Duration::from_millis(100), &tx, ());
        timer.cancel();
        assert!(!timer.is_armed());

        let waited = timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(waited.is_err(), "cancelled timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimerHandle::arm(Duration::from_millis(10), &tx, 1u8);
        assert_eq!(rx.recv().await, Some(1));

        // Already fired, then cancelled twice.
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_armed());

        let mut never = TimerHandle::idle();
        never.cancel();
        assert!(!never.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let _timer = TimerHandle::arm(Duration::from_millis(50), &tx, ());
        }
        assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
    }
}
