use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender};
use std::thread;

use super::runtime::{SessionHandle, TaskRuntime};
use crate::TaskError;

/// Work bound to a session registered in a [`TaskRuntime`].
///
/// The work runs in three stages:
/// 1. setup: the spawning thread is blocked, the task reads what it needs via
///    [`TaskContext::setup`];
/// 2. after [`TaskContext::detach`] the spawner resumes and the task performs
///    its slow I/O without touching the session;
/// 3. every later write goes through [`TaskContext::with_live`], which takes
///    the runtime lock and silently does nothing once the session is gone.
pub struct BackgroundTask;

impl BackgroundTask {
    pub fn spawn<T, F>(
        runtime: &Arc<TaskRuntime<T>>,
        handle: SessionHandle,
        name: &str,
        work: F,
    ) -> Result<(), TaskError>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext<T>) + Send + 'static,
    {
        runtime.try_acquire(handle)?;

        let (detach_tx, detach_rx) = mpsc::sync_channel(1);
        let context = TaskContext {
            runtime: Arc::clone(runtime),
            handle,
            detach: Some(detach_tx),
        };

        if let Err(e) = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || work(context))
        {
            runtime.release(handle);
            return Err(TaskError::Spawn(e));
        }

        // Either an explicit detach or the context being dropped unblocks us.
        let _ = detach_rx.recv();
        Ok(())
    }
}

pub struct TaskContext<T> {
    runtime: Arc<TaskRuntime<T>>,
    handle: SessionHandle,
    detach: Option<SyncSender<()>>,
}

impl<T> TaskContext<T> {
    fn is_detached(&self) -> bool {
        self.detach.is_none()
    }

    /// Stage 1 access while the spawner is still waiting.
    pub fn setup<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        debug_assert!(!self.is_detached(), "setup after detach");
        self.runtime.with(self.handle, f)
    }

    pub fn detach(&mut self) {
        if let Some(sender) = self.detach.take() {
            let _ = sender.send(());
        }
    }

    pub fn is_live(&self) -> bool {
        self.runtime.is_live(self.handle)
    }

    /// Guarded re-entry: lock, check the owner is still registered, mutate, unlock.
    pub fn with_live<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.runtime.with(self.handle, f)
    }
}

impl<T> Drop for TaskContext<T> {
    fn drop(&mut self) {
        self.detach();
        self.runtime.release(self.handle);
    }
}
