//! Cancellable periodic background task

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Delay before refreshing something valid for `expire` seconds
pub fn refresh_delay(expire: u32, ratio: f64) -> Duration {
    let ratio = if ratio > 0.0 && ratio < 1.0 { ratio } else { 0.5 };
    Duration::from_secs_f64(f64::from(expire) * ratio)
}

/// Runs an action after a delay, again and again while it asks for more
pub struct PeriodicRefresher {
    name: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicRefresher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task: Mutex::new(None),
        }
    }

    /// Start (or restart) the timer.
    ///
    /// `action` returns the delay until its next run, or `None` to stop.
    pub fn start<F, Fut>(&self, first_delay: Duration, mut action: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<Duration>> + Send + 'static,
    {
        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            let mut delay = first_delay;
            loop {
                tokio::time::sleep(delay).await;
                debug!("{} refresher fired", name);
                match action().await {
                    Some(next) => delay = next,
                    None => break,
                }
            }
            debug!("{} refresher finished", name);
        });

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending run, if any. Must not be called from inside the action.
    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
            debug!("{} refresher stopped", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        task.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for PeriodicRefresher {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}
