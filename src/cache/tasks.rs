//! Background maintenance loops
//!
//! Two independent tokio tasks share the manager's core: the cleanup loop
//! (invalidation, then memory optimization, then an optional snapshot) and
//! the warming loop. Both sleep between passes and wake early on the
//! shutdown channel. Each pass runs in its own task so a panicking pass is
//! logged and the loop keeps its schedule.

use crate::cache::manager::CacheCore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of the background loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Stopped => write!(f, "stopped"),
            TaskState::Starting => write!(f, "starting"),
            TaskState::Running => write!(f, "running"),
            TaskState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Handles of the running loops and their shutdown signal
#[derive(Debug)]
pub(crate) struct BackgroundTasks {
    state: TaskState,
    cleanup: Option<JoinHandle<()>>,
    warming: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self {
            state: TaskState::Stopped,
            cleanup: None,
            warming: None,
            shutdown: None,
        }
    }
}

impl BackgroundTasks {
    pub(crate) fn state(&self) -> TaskState {
        self.state
    }

    /// Both loops spawned and neither has exited
    pub(crate) fn is_running(&self) -> bool {
        let alive = |h: &Option<JoinHandle<()>>| h.as_ref().map(|h| !h.is_finished()).unwrap_or(false);
        alive(&self.cleanup) && alive(&self.warming)
    }

    /// Spawn both loops. No-op when already running.
    pub(crate) fn start(&mut self, core: Arc<CacheCore>) -> bool {
        if self.state != TaskState::Stopped {
            debug!("Background tasks already {}", self.state);
            return false;
        }
        self.state = TaskState::Starting;

        let (tx, rx) = watch::channel(false);
        let cleanup_interval = core.config().cleanup_interval;
        let warming_interval = core.config().warming_interval;

        self.cleanup = Some(tokio::spawn(cleanup_loop(
            Arc::clone(&core),
            cleanup_interval,
            rx.clone(),
        )));
        self.warming = Some(tokio::spawn(warming_loop(core, warming_interval, rx)));
        self.shutdown = Some(tx);
        self.state = TaskState::Running;

        info!(
            "Started cache background tasks (cleanup every {:?}, warming every {:?})",
            cleanup_interval, warming_interval
        );
        true
    }

    /// Signal both loops and wait for them to exit. No-op when stopped.
    pub(crate) async fn stop(&mut self) -> bool {
        if self.state != TaskState::Running {
            debug!("Background tasks not running ({})", self.state);
            return false;
        }
        self.state = TaskState::Stopping;

        if let Some(tx) = self.shutdown.take() {
            // Receivers may already be gone if a loop exited on its own
            let _ = tx.send(true);
        }

        for (name, handle) in [("cleanup", self.cleanup.take()), ("warming", self.warming.take())] {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    error!("Cache {} task ended abnormally: {}", name, e);
                }
            }
        }

        self.state = TaskState::Stopped;
        info!("Stopped cache background tasks");
        true
    }
}

async fn cleanup_loop(core: Arc<CacheCore>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    debug!("Cache cleanup loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }

        let pass_core = Arc::clone(&core);
        match tokio::spawn(async move { pass_core.run_cleanup_pass().await }).await {
            Ok(Ok(summary)) => {
                if summary.invalidated > 0 || summary.evicted > 0 {
                    debug!(
                        "Cleanup pass: {} invalidated, {} evicted",
                        summary.invalidated, summary.evicted
                    );
                }
            }
            Ok(Err(e)) => warn!("Cache cleanup pass failed: {}", e),
            Err(e) => error!("Cache cleanup pass aborted: {}", e),
        }
    }
    debug!("Cache cleanup loop exited");
}

async fn warming_loop(core: Arc<CacheCore>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    debug!("Cache warming loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }

        let pass_core = Arc::clone(&core);
        match tokio::spawn(async move { pass_core.run_warming_pass().await }).await {
            Ok(warmed) => {
                if warmed > 0 {
                    debug!("Warming pass inserted {} placeholders", warmed);
                }
            }
            Err(e) => error!("Cache warming pass aborted: {}", e),
        }
    }
    debug!("Cache warming loop exited");
}
