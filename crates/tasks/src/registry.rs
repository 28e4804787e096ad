//! Registry of in-flight tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cadence_core::TaskId;

use crate::task::{Shared, TaskStatus};

/// Tracks tasks between the start of `run` and their terminal state.
///
/// Tasks opt in with `with_registry` on their builder. Useful for answering
/// "what is still retrying right now?" from a health or admin endpoint.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, Arc<Shared>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, task: Arc<Shared>) {
        self.lock().insert(task.id(), task);
    }

    pub(crate) fn remove(&self, id: TaskId) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: TaskId) -> Option<TaskStatus> {
        let task = self.lock().get(&id).cloned();
        task.map(|task| task.status())
    }

    /// Statuses of all in-flight tasks, oldest first.
    pub fn statuses(&self) -> Vec<TaskStatus> {
        let tasks: Vec<Arc<Shared>> = self.lock().values().cloned().collect();
        let mut statuses: Vec<TaskStatus> = tasks.iter().map(|task| task.status()).collect();
        // UUIDv7 ids sort by creation time.
        statuses.sort_by_key(|status| *status.id.as_uuid());
        statuses
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<Shared>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
