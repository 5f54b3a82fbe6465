//! Cancelable fire-once timers keyed by name.
//!
//! Used for deferred rollbacks: a SCHEDULED recommendation registers a timer
//! for its trunk, and a healthy sample cancels it before it fires.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle};

struct Timer {
    handle: JoinHandle<()>,
    /// Set by whichever comes first: the timer firing or a cancel.
    claimed: Arc<AtomicBool>,
}

impl Timer {
    fn is_pending(&self) -> bool {
        !self.claimed.load(Ordering::SeqCst) && !self.handle.is_finished()
    }
}

/// Registry of pending deferred tasks.
///
/// Each key holds at most one timer, including one that has fired and is
/// still running. Finished timers are pruned lazily.
#[derive(Clone, Default)]
pub struct DeferredTasks {
    tasks: Arc<Mutex<HashMap<String, Timer>>>,
}

impl std::fmt::Debug for DeferredTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTasks").finish_non_exhaustive()
    }
}

impl DeferredTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay` unless canceled first.
    ///
    /// Returns false, leaving the existing timer untouched, when `key` is
    /// already pending or its task is still running.
    pub async fn schedule<F>(&self, key: impl Into<String>, delay: Duration, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, timer| !timer.handle.is_finished());
        if tasks.contains_key(&key) {
            return false;
        }

        let claimed = Arc::new(AtomicBool::new(false));
        let fire = Arc::clone(&claimed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fire.swap(true, Ordering::SeqCst) {
                return;
            }
            task.await;
        });
        tracing::debug!(key = %key, delay_ms = delay.as_millis(), "Deferred task scheduled");
        tasks.insert(key, Timer { handle, claimed });
        true
    }

    /// Stop a timer that has not fired yet. Returns whether one was stopped.
    ///
    /// A timer whose task has already started is left to finish.
    pub async fn cancel(&self, key: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        let won = tasks.get(key).is_some_and(|timer| {
            !timer.handle.is_finished() && !timer.claimed.swap(true, Ordering::SeqCst)
        });
        if !won {
            return false;
        }
        if let Some(timer) = tasks.remove(key) {
            timer.handle.abort();
        }
        tracing::debug!(key, "Deferred task canceled");
        true
    }

    /// Whether `key` has a timer that has not fired yet.
    pub async fn is_pending(&self, key: &str) -> bool {
        self.tasks.lock().await.get(key).is_some_and(Timer::is_pending)
    }

    pub async fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|timer| timer.is_pending())
            .count()
    }

    /// Abort every timer.
    pub async fn shutdown_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, timer) in tasks.drain() {
            timer.claimed.store(true, Ordering::SeqCst);
            timer.handle.abort();
        }
    }
}
