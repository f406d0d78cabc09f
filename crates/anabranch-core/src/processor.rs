use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{error, info, Instrument};

use crate::{
    orchestrator::Orchestrator,
    queue::TaskQueue,
    types::{Task, TaskStatus},
};

const HISTORY_LIMIT: usize = 100;

/// Outcome of a finished task, kept for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: String,
    pub ticket: String,
    pub title: String,
    pub status: TaskStatus,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub pull_requests: Vec<String>,
    pub cost_in_dollars: Option<f64>,
    pub finished_at: DateTime<Utc>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            ticket: task.ticket.external_id.clone(),
            title: task.ticket.title.clone(),
            status: task.status,
            error_message: task.error_message.clone(),
            skip_reason: task.skip_reason.clone(),
            pull_requests: task.pull_requests.iter().map(|pr| pr.url.clone()).collect(),
            cost_in_dollars: task.result.as_ref().and_then(|r| r.cost_in_dollars),
            finished_at: Utc::now(),
        }
    }
}

/// Single consumer of the task queue. Drains tasks one at a time into the
/// orchestrator; at most one drain runs at any moment.
pub struct TaskProcessor {
    queue: Arc<TaskQueue>,
    orchestrator: Arc<dyn Orchestrator>,
    draining: AtomicBool,
    idle: Notify,
    history: Mutex<VecDeque<TaskSummary>>,
}

impl TaskProcessor {
    /// Creates the processor and registers its trigger with `queue`.
    /// Must be called within a tokio runtime.
    pub fn start(queue: Arc<TaskQueue>, orchestrator: Arc<dyn Orchestrator>) -> Arc<Self> {
        let processor = Arc::new(Self {
            queue: Arc::clone(&queue),
            orchestrator,
            draining: AtomicBool::new(false),
            idle: Notify::new(),
            history: Mutex::new(VecDeque::new()),
        });

        let weak = Arc::downgrade(&processor);
        queue.register_callback(move || {
            if let Some(processor) = weak.upgrade() {
                processor.trigger();
            }
        });

        info!(
            orchestrator = processor.orchestrator.name(),
            "task processor started, listening for tasks"
        );

        // Anything enqueued before registration would otherwise wait for the next enqueue.
        if !queue.is_empty() {
            processor.trigger();
        }
        processor
    }

    /// Starts a drain unless one is already running.
    pub fn trigger(self: &Arc<Self>) {
        if !self.try_claim() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(this.drain().in_current_span());
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Most recent finished tasks, newest first.
    pub fn history(&self) -> Vec<TaskSummary> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Resolves once no drain is running and the queue is empty.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_draining() && self.queue.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn try_claim(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn drain(self: Arc<Self>) {
        loop {
            while let Some(task) = self.queue.dequeue() {
                self.process(task).await;
            }
            self.draining.store(false, Ordering::Release);

            // A task enqueued between the last dequeue and the store saw the
            // flag still set and did not start a drain.
            if self.queue.is_empty() || !self.try_claim() {
                break;
            }
        }
        self.idle.notify_waiters();
    }

    async fn process(&self, task: Task) {
        let task_id = task.id.clone();
        info!(task_id = %task_id, ticket = %task.ticket.external_id, "processing task");

        let mut snapshot = task.clone();
        let orchestrator = Arc::clone(&self.orchestrator);
        // Spawned so a panicking task cannot take the drain loop down with it.
        let handle = tokio::spawn(async move {
            let mut task = task;
            let result = orchestrator.handle_task(&mut task).await;
            (task, result)
        }
        .in_current_span());

        match handle.await {
            Ok((task, Ok(()))) => {
                info!(task_id = %task_id, status = %task.status, "task finished");
                self.record(&task);
            }
            Ok((task, Err(e))) => {
                error!(task_id = %task_id, "task processing failed: {e:#}");
                self.record(&task);
            }
            Err(e) => {
                let message = panic_message(e);
                error!(task_id = %task_id, "task processing panicked: {message}");
                snapshot.fail(format!("panicked: {message}"));
                self.record(&snapshot);
            }
        }
    }

    fn record(&self, task: &Task) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(TaskSummary::from(task));
    }
}

fn panic_message(e: tokio::task::JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into()),
        Err(e) => e.to_string(),
    }
}
