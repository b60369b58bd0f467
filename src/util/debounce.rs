use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::sleep;

/// Delay-then-run scheduler where a newer call cancels the one still
/// waiting. One of these per input (search box, map region) replaces the
/// timer-handle bookkeeping every call site would otherwise duplicate.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<oneshot::Sender<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `task` after the delay, cancelling any call still pending.
    /// Only the timer is cancelled: a task whose delay already elapsed runs
    /// to completion.
    pub fn call<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => task.await,
                _ = cancel_rx => {}
            }
        });
        *self.pending.lock().unwrap() = Some(cancel_tx);
    }

    pub fn cancel(&self) {
        // dropping the sender wakes the timer branch; a body already past
        // its delay is out of reach
        self.pending.lock().unwrap().take();
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
