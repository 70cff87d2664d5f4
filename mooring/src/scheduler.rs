//! The scheduler seam for user-visible work.
//!
//! Inbound invocation bodies and the disconnect hooks are spawned through a
//! [`TaskScheduler`] rather than run on the channel reader, which is what
//! guarantees that arbitrary user code never executes on the reader task.
//! Callers with thread-affinity requirements (a UI thread, an actor loop)
//! supply their own implementation; the default schedules onto the current
//! tokio runtime.

use mooring_core::BoxFuture;

/// Runs user-visible work for an endpoint.
pub trait TaskScheduler: Send + Sync + 'static {
    /// Schedule `task` to run. Implementations must not run it inline on the
    /// calling thread.
    fn spawn(&self, task: BoxFuture<()>);
}

/// Schedules onto a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Schedule onto the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime the caller is currently inside.
    ///
    /// # Panics
    ///
    /// Panics outside a runtime context, like
    /// [`Handle::current`](tokio::runtime::Handle::current).
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl TaskScheduler for TokioScheduler {
    fn spawn(&self, task: BoxFuture<()>) {
        self.handle.spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn tokio_scheduler_runs_tasks() {
        let ran = Arc::new(AtomicUsize::new(0));
        let scheduler = TokioScheduler::current();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let counter = ran.clone();
        scheduler.spawn(Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        }));

        rx.await.expect("task completion");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
