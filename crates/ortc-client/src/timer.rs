//! Restartable one-shot and repeating timers backed by tokio tasks

use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// A timer owning at most one scheduled task.
///
/// Starting the timer replaces (aborts) any task already scheduled.
/// Callbacks must be synchronous; anything long-running should be spawned
/// from inside them.
#[derive(Debug)]
pub(crate) struct TaskTimer {
    name: &'static str,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TaskTimer {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            task: Mutex::new(None),
        }
    }

    /// Run `f` once after `delay`
    pub(crate) fn start_once<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        trace!("{} timer armed for {:?}", self.name, delay);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        self.replace(handle);
    }

    /// Run `f` every `period`, first after one full period
    pub(crate) fn start_repeating<F>(&self, period: Duration, f: F)
    where
        F: Fn() + Send + 'static,
    {
        trace!("{} timer repeating every {:?}", self.name, period);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                f();
            }
        });
        self.replace(handle);
    }

    pub(crate) fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            trace!("{} timer stopped", self.name);
            handle.abort();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    fn replace(&self, handle: JoinHandle<()>) {
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
