//! Cancellable scheduled tasks.
//!
//! Each owner keeps the handles of its own pending timers and cancels them
//! on reset or teardown. Dropping a handle aborts the task.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Owned handle to a spawned timer task. Aborts the task on drop.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Spawn `fut` on the current runtime.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: Some(tokio::spawn(fut)),
        }
    }

    /// Run `f` once after `delay`.
    pub fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        })
    }

    pub fn cancel(self) {
        drop(self);
    }

    /// Release the handle and let the task run to completion.
    ///
    /// A task that removes its own handle from an owner detaches it, so the
    /// drop does not abort the code still running.
    pub fn detach(mut self) {
        self.handle.take();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Named set of pending tasks.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: HashMap<&'static str, ScheduledTask>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a task, cancelling any previous task with the same name.
    pub fn insert(&mut self, name: &'static str, task: ScheduledTask) {
        if let Some(old) = self.tasks.insert(name, task) {
            old.cancel();
        }
    }

    /// Cancel one task. Returns false if none was pending under `name`.
    pub fn cancel(&mut self, name: &str) -> bool {
        match self.tasks.remove(name) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove a task without cancelling it.
    pub fn take(&mut self, name: &str) -> Option<ScheduledTask> {
        self.tasks.remove(name)
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel();
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|t| !t.is_finished())
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.values().all(ScheduledTask::is_finished)
    }
}
