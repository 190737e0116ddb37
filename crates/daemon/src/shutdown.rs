//! Process-wide shutdown hook registry.
//!
//! Stateful components register the cleanup they need at process exit and
//! deregister it once they have cleaned up themselves. The registry hands
//! the armed tasks back in LIFO order, so a resource registered later (the
//! VNC session) is torn down before the resource it depends on (the
//! virtual display). Both the signal path and the normal exit path drain
//! the same registry.

use std::sync::{Arc, Mutex};

/// A cleanup obligation owned by one of the stateful components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTask {
    /// Force-stop the VNC server child and wait out the grace period.
    StopSession,
    /// Tear down the virtual display mode and unbind the output.
    DeleteVirtualScreen,
}

/// Shared, ordered registry of armed cleanup tasks.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHooks {
    tasks: Arc<Mutex<Vec<CleanupTask>>>,
}

impl ShutdownHooks {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a cleanup task. Registering a task that is already armed is a
    /// no-op, so callers never double-register.
    pub fn register(&self, task: CleanupTask) {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.contains(&task) {
            tracing::debug!(?task, "registered shutdown hook");
            tasks.push(task);
        }
    }

    /// Disarms a cleanup task. Unknown tasks are ignored.
    pub fn deregister(&self, task: CleanupTask) {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(idx) = tasks.iter().position(|t| *t == task) {
            tracing::debug!(?task, "deregistered shutdown hook");
            tasks.remove(idx);
        }
    }

    /// Whether a task is currently armed.
    pub fn is_registered(&self, task: CleanupTask) -> bool {
        self.tasks.lock().unwrap().contains(&task)
    }

    /// Takes all armed tasks, most recently registered first. The registry
    /// is empty afterwards, so a second drain runs nothing.
    pub fn drain(&self) -> Vec<CleanupTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut drained: Vec<_> = tasks.drain(..).collect();
        drained.reverse();
        drained
    }
}
