//! The shared monitor every render thread synchronizes through.
//!
//! One `ContextResourceManager` is created per host application and handed to
//! every view by `Arc`. It owns a registry with the state of each render
//! thread, so the state of any worker is only ever read or written while this
//! single lock is held. Waiters always loop on their condition because
//! `notify_all` is used for every state change.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::state::RenderWorkerState;

/// Identifies one render thread within its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    workers: HashMap<WorkerId, RenderWorkerState>,
    context_holders: BTreeSet<WorkerId>,
}

impl Registry {
    pub(crate) fn worker(&self, id: WorkerId) -> Option<&RenderWorkerState> {
        self.workers.get(&id)
    }

    pub(crate) fn worker_mut(&mut self, id: WorkerId) -> Option<&mut RenderWorkerState> {
        self.workers.get_mut(&id)
    }
}

pub(crate) type MonitorGuard<'a> = MutexGuard<'a, Registry>;

/// Process-wide monitor and context accounting shared by all render threads.
#[derive(Default)]
pub struct ContextResourceManager {
    registry: Mutex<Registry>,
    cond: Condvar,
}

impl ContextResourceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub(crate) fn lock(&self) -> MonitorGuard<'_> {
        self.registry.lock()
    }

    /// Releases the monitor, sleeps until the next `notify_all`, and
    /// re-acquires it.
    pub(crate) fn wait(&self, guard: &mut MonitorGuard<'_>) {
        self.cond.wait(guard);
    }

    pub(crate) fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Blocks while `condition` holds for worker `id`. Returns as soon as it
    /// does not, or when the worker is no longer registered.
    pub(crate) fn wait_while<F>(&self, guard: &mut MonitorGuard<'_>, id: WorkerId, mut condition: F)
    where
        F: FnMut(&RenderWorkerState) -> bool,
    {
        while guard.worker(id).map_or(false, &mut condition) {
            self.wait(guard);
        }
    }

    pub(crate) fn register(&self, state: RenderWorkerState) -> WorkerId {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = WorkerId(registry.next_id);
        registry.workers.insert(id, state);
        id
    }

    pub(crate) fn unregister(&self, id: WorkerId) {
        let mut registry = self.lock();
        self.unregister_locked(&mut registry, id);
        self.notify_all();
    }

    pub(crate) fn unregister_locked(&self, registry: &mut Registry, id: WorkerId) {
        registry.workers.remove(&id);
        registry.context_holders.remove(&id);
    }

    pub(crate) fn context_acquired_locked(&self, registry: &mut Registry, id: WorkerId) {
        registry.context_holders.insert(id);
        debug!(worker = %id, live = registry.context_holders.len(), "context acquired");
    }

    /// Accounts for a released (or never obtained) context and wakes every
    /// waiter, including other render threads.
    pub(crate) fn release_context_locked(&self, registry: &mut Registry, id: WorkerId) {
        registry.context_holders.remove(&id);
        self.notify_all();
    }

    /// Number of render threads currently holding a context.
    pub fn live_contexts(&self) -> usize {
        self.lock().context_holders.len()
    }

    pub fn holds_context(&self, id: WorkerId) -> bool {
        self.lock().context_holders.contains(&id)
    }

    /// Number of registered render threads, running or not yet joined.
    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }
}

impl fmt::Debug for ContextResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.registry.try_lock() {
            Some(registry) => f
                .debug_struct("ContextResourceManager")
                .field("workers", &registry.workers.len())
                .field("context_holders", &registry.context_holders)
                .finish(),
            None => f.write_str("ContextResourceManager { <locked> }"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RenderMode;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ids_are_unique_and_accounting_is_per_worker() {
        let manager = ContextResourceManager::new();
        let a = manager.register(RenderWorkerState::new(RenderMode::Continuously, false));
        let b = manager.register(RenderWorkerState::new(RenderMode::Continuously, false));
        assert_ne!(a, b);
        assert_eq!(manager.worker_count(), 2);

        {
            let mut registry = manager.lock();
            manager.context_acquired_locked(&mut registry, a);
        }
        assert!(manager.holds_context(a));
        assert!(!manager.holds_context(b));
        assert_eq!(manager.live_contexts(), 1);

        manager.unregister(a);
        assert_eq!(manager.live_contexts(), 0);
        assert_eq!(manager.worker_count(), 1);
    }

    #[test]
    fn wait_while_wakes_on_notify() {
        let manager = Arc::new(ContextResourceManager::new());
        let id = manager.register(RenderWorkerState::new(RenderMode::WhenDirty, false));

        let setter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let mut registry = manager.lock();
                if let Some(state) = registry.worker_mut(id) {
                    state.exited = true;
                }
                manager.notify_all();
            })
        };

        let mut guard = manager.lock();
        manager.wait_while(&mut guard, id, |state| !state.exited);
        assert!(guard.worker(id).unwrap().exited);
        drop(guard);
        setter.join().unwrap();
    }

    #[test]
    fn wait_while_returns_for_unknown_worker() {
        let manager = ContextResourceManager::new();
        let id = manager.register(RenderWorkerState::new(RenderMode::WhenDirty, false));
        manager.unregister(id);
        let mut guard = manager.lock();
        manager.wait_while(&mut guard, id, |_| true);
    }
}
