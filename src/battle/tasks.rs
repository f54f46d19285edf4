//! Supervised background tasks.
//!
//! Every battle driver runs through a [`TaskPool`] so errors and panics are
//! logged and counted instead of vanishing with a detached handle.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::BattleError;

#[derive(Debug, Default)]
struct TaskStats {
    spawned: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Spawns and watches background work.
#[derive(Clone)]
pub struct TaskPool {
    active: Arc<watch::Sender<usize>>,
    stats: Arc<TaskStats>,
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskPool {
    /// Empty pool.
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            active: Arc::new(active),
            stats: Arc::new(TaskStats::default()),
        }
    }

    /// Run `task` in the background under `name`.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), BattleError>> + Send + 'static,
    {
        let name = name.into();
        self.active.send_modify(|n| *n += 1);
        self.stats.spawned.fetch_add(1, Ordering::Relaxed);

        let handle = tokio::spawn(task);
        let active = Arc::clone(&self.active);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => debug!("Task {} finished", name),
                Ok(Err(e)) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!("Task {} failed: {}", name, e);
                }
                Err(e) if e.is_panic() => {
                    stats.panicked.fetch_add(1, Ordering::Relaxed);
                    error!("Task {} panicked", name);
                }
                Err(_) => warn!("Task {} was cancelled", name),
            }
            active.send_modify(|n| *n = n.saturating_sub(1));
        });
    }

    /// Tasks still running.
    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Tasks spawned so far.
    pub fn spawned(&self) -> u64 {
        self.stats.spawned.load(Ordering::Relaxed)
    }

    /// Tasks that returned an error.
    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Tasks that panicked.
    pub fn panicked(&self) -> u64 {
        self.stats.panicked.load(Ordering::Relaxed)
    }

    /// Resolve once no task is running.
    ///
    /// Tasks spawned from inside a running task keep the pool busy.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in self, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
