use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

#[derive(Debug, Default)]
struct SupervisorState {
    running: AtomicU64,
    /// Cancelled when shutdown is requested.
    stop: CancellationToken,
    /// Cancelled once the last tracked task has finished.
    stopped: CancellationToken,
}

impl SupervisorState {
    fn track(self: &Arc<Self>) -> TaskGuard {
        self.running.fetch_add(1, Ordering::AcqRel);
        TaskGuard(self.clone())
    }
}

/// Tracks the accept loop and connection tasks of a server so that it can
/// be shut down and joined.
///
/// The supervisor itself holds one tracked slot until [`stop`](Self::stop)
/// is called, so [`all_stopped`](Self::all_stopped) cannot resolve while the
/// server is still meant to be running, even with no connections.
///
/// ```rust,no_run
/// # use microrpc::TaskSupervisor;
/// # #[tokio::main]
/// # async fn main() {
/// let supervisor = TaskSupervisor::create();
/// let guard = supervisor.start_async_task();
/// tokio::spawn(async move {
///     guard.stopped().await;
/// });
/// supervisor.stop();
/// supervisor.all_stopped().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TaskSupervisor(Arc<SupervisorState>);

/// Keeps its task counted as running until dropped.
#[derive(Debug)]
pub struct TaskGuard(Arc<SupervisorState>);

impl TaskSupervisor {
    #[must_use]
    pub fn create() -> Self {
        let supervisor = Self(Arc::default());

        let guard = supervisor.start_async_task();
        tokio::spawn(async move {
            guard.stopped().await;
        });

        supervisor
    }

    pub fn stop(&self) {
        self.0.stop.cancel();
    }

    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    pub fn all_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stopped.cancelled()
    }

    #[must_use]
    pub fn running(&self) -> u64 {
        self.0.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn start_async_task(&self) -> TaskGuard {
        self.0.track()
    }
}

impl Drop for TaskSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TaskGuard {
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.0.stop.cancelled()
    }

    /// Starts tracking another task under the same supervisor, e.g. a
    /// connection spawned by the accept loop.
    #[must_use]
    pub fn start_async_task(&self) -> TaskGuard {
        self.0.track()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.0.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.stopped.cancel();
        }
    }
}
