//! Graceful shutdown for the foreground loops.
//!
//! The scheduler and health monitor subscribe to a broadcast channel and
//! leave their loop at the next safe point. A trunk mutation already in its
//! critical section always runs to completion.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::broadcast;

use crate::{Error, Result};

/// Shutdown signal sent to all active loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Finish the current iteration, release locks, exit.
    Graceful,
    /// Second interrupt: stop waiting on timers and exit as soon as possible.
    Force,
}

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tx: broadcast::Sender<ShutdownSignal>,
    requested: Arc<AtomicBool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.tx.subscribe()
    }

    /// Broadcast `signal`; the first call marks shutdown as requested.
    pub fn shutdown(&self, signal: ShutdownSignal) {
        self.requested.store(true, Ordering::SeqCst);
        tracing::info!(?signal, "Shutdown requested");
        let _ = self.tx.send(signal);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Forward SIGINT/SIGTERM: the first becomes `Graceful`, any later one `Force`.
    pub fn listen_for_signals(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())
                .map_err(|e| Error::io_error(format!("Failed to install SIGINT handler: {e}")))?;
            let mut sigterm = signal(SignalKind::terminate())
                .map_err(|e| Error::io_error(format!("Failed to install SIGTERM handler: {e}")))?;

            let coordinator = self.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = sigint.recv() => tracing::info!("Received SIGINT"),
                        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    }
                    coordinator.escalate();
                }
            });
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let coordinator = self.clone();
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C");
                    coordinator.escalate();
                }
            });
            Ok(())
        }
    }

    fn escalate(&self) {
        let signal = if self.is_shutting_down() {
            ShutdownSignal::Force
        } else {
            ShutdownSignal::Graceful
        };
        self.shutdown(signal);
    }
}
