use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use tracing::info;

use crate::types::Task;

type EnqueuedCallback = Arc<dyn Fn() + Send + Sync>;

/// In-process FIFO of tasks awaiting processing. Unbounded; lost on restart.
#[derive(Default)]
pub struct TaskQueue {
    pending: Mutex<VecDeque<Task>>,
    on_enqueued: Mutex<Option<EnqueuedCallback>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `task` and fires the registered callback.
    pub fn enqueue(&self, task: Task) {
        info!(task_id = %task.id, ticket = %task.ticket.external_id, "task enqueued");
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(task);

        // Cloned out so the callback runs without either lock held.
        let callback = self
            .on_enqueued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Removes and returns the oldest task, if any.
    pub fn dequeue(&self) -> Option<Task> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Installs the "work arrived" callback, replacing any previous one.
    pub fn register_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_enqueued.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
