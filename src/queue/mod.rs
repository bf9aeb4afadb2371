//! Durable background task queue
//!
//! A [`TaskQueue`] pairs a queue name with one worker implementation and a
//! [`TaskStore`]. Enqueued tasks are persisted before [`TaskQueue::add`]
//! returns, then picked up by a polling loop that claims one task at a time,
//! runs the worker, and records the outcome. Task state is only ever read
//! from storage, so status queries work from any process sharing the
//! database and a task survives the crash of the process that enqueued it.
//!
//! A failed task is terminal; there is no retry and no cancellation of
//! in-flight work. [`TaskQueue::close`] discards queued tasks and abandons
//! rather than gracefully stops anything already running.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod store;

pub use store::{TaskRow, TaskStore, task_status};

/// How often an idle queue polls storage for new work
const POLL_INTERVAL_MS: u64 = 100;

/// How long a claim stays valid without an `updated_at` refresh
///
/// A worker that dies after claiming leaves its task running in storage;
/// once the lease expires the poll loop flips the task back to queued so
/// another worker can pick it up. Execution is at-least-once, so a task
/// whose worker stalls past the lease may run twice.
const CLAIM_LEASE_SECS: i64 = 60;

/// Work executed by a [`TaskQueue`]
///
/// The return value is persisted as the task's result; a returned error
/// moves the task to its terminal failed state.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    /// Run one task to completion
    async fn run(&self, task_id: &str, payload: Value, progress: ProgressHandle) -> Result<Value>;
}

/// Lets a running worker publish progress for its task
///
/// Only the most recent reported value is retained. Persistence failures are
/// logged and swallowed; progress is advisory and must not fail the task.
#[derive(Clone)]
pub struct ProgressHandle {
    store: TaskStore,
    task_id: String,
}

impl ProgressHandle {
    /// Overwrite the task's current progress value
    pub async fn report(&self, value: &str) {
        if let Err(e) = self.store.set_progress(&self.task_id, value).await {
            warn!(task_id = %self.task_id, error = %e, "failed to persist task progress");
        }
    }
}

/// Observable task state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// Durably enqueued, waiting for a worker
    Queued,
    /// Claimed by a worker, with the most recent progress value if any
    Running {
        /// Latest progress report
        progress: Option<String>,
    },
    /// Finished with a result
    Completed,
    /// Finished with an error; terminal
    Failed {
        /// The worker's failure reason
        error: String,
    },
}

/// A named, durable, at-least-once job runner
pub struct TaskQueue {
    name: String,
    store: TaskStore,
    cancel: CancellationToken,
}

impl TaskQueue {
    /// Create a queue and start its polling loop
    pub fn new(name: impl Into<String>, store: TaskStore, worker: Arc<dyn TaskWorker>) -> Self {
        Self::with_claim_lease(name, store, worker, CLAIM_LEASE_SECS)
    }

    /// Create a queue with a custom claim lease
    ///
    /// The lease bounds how long a crashed worker's claim blocks a task from
    /// being re-queued. A task that can legitimately go longer than the
    /// default without a progress report needs a longer lease.
    pub fn with_claim_lease(
        name: impl Into<String>,
        store: TaskStore,
        worker: Arc<dyn TaskWorker>,
        lease_secs: i64,
    ) -> Self {
        let name = name.into();
        let cancel = CancellationToken::new();

        let loop_name = name.clone();
        let loop_store = store.clone();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            poll_loop(loop_name, loop_store, worker, lease_secs, loop_cancel).await;
        });

        Self {
            name,
            store,
            cancel,
        }
    }

    /// The queue's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Durably enqueue a task for asynchronous execution
    ///
    /// Returns once the task is persisted, not once it has run. `task_id` is
    /// caller-chosen, must be unique for the queue's lifetime, and is the
    /// handle for all later status queries.
    pub async fn add(&self, task_id: &str, payload: Value) -> Result<()> {
        self.store.enqueue(&self.name, task_id, &payload).await?;
        info!(task_id, queue = %self.name, "task enqueued");
        Ok(())
    }

    /// Whether the task has completed successfully
    ///
    /// Raises [`Error::TaskNotFound`] for an unknown id and
    /// [`Error::TaskFailed`] once the task is in its terminal failed state,
    /// so `Ok(false)` always means "still pending or running". See
    /// [`TaskQueue::task_status`] for the variant that reports failure as a
    /// value instead.
    pub async fn is_task_finished(&self, task_id: &str) -> Result<bool> {
        let task = self.fetch_known(task_id).await?;
        match task.status {
            task_status::COMPLETED => Ok(true),
            task_status::FAILED => Err(Error::TaskFailed {
                task_id: task_id.to_string(),
                reason: task.error.unwrap_or_default(),
            }),
            _ => Ok(false),
        }
    }

    /// The task's current state as a value
    ///
    /// Unlike [`TaskQueue::is_task_finished`], failure is reported as
    /// [`TaskStatus::Failed`] rather than as an error, so a caller can
    /// distinguish "failed" from "cannot query".
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let task = self.fetch_known(task_id).await?;
        let status = match task.status {
            task_status::QUEUED => TaskStatus::Queued,
            task_status::RUNNING => TaskStatus::Running {
                progress: task.progress,
            },
            task_status::COMPLETED => TaskStatus::Completed,
            _ => TaskStatus::Failed {
                error: task.error.unwrap_or_default(),
            },
        };
        Ok(status)
    }

    /// The worker's return value for a completed task
    ///
    /// Raises [`Error::TaskNotFinished`] while the task is still pending or
    /// running and [`Error::TaskFailed`] for a failed one.
    pub async fn get_task_return_value(&self, task_id: &str) -> Result<Value> {
        let task = self.fetch_known(task_id).await?;
        match task.status {
            task_status::COMPLETED => {
                let result = task.result.unwrap_or_else(|| "null".to_string());
                Ok(serde_json::from_str(&result)?)
            }
            task_status::FAILED => Err(Error::TaskFailed {
                task_id: task_id.to_string(),
                reason: task.error.unwrap_or_default(),
            }),
            _ => Err(Error::TaskNotFinished(task_id.to_string())),
        }
    }

    /// The most recent progress value reported for the task
    pub async fn get_task_progress(&self, task_id: &str) -> Result<Option<String>> {
        let task = self.fetch_known(task_id).await?;
        Ok(task.progress)
    }

    /// Stop the queue, discarding queued tasks
    ///
    /// In-flight work is abandoned, not gracefully awaited; its final state
    /// is whatever it last persisted.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let discarded = self.store.delete_pending(&self.name).await?;
        info!(queue = %self.name, discarded, "task queue closed");
        self.store.close().await;
        Ok(())
    }

    async fn fetch_known(&self, task_id: &str) -> Result<TaskRow> {
        self.store
            .fetch(task_id)
            .await?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }
}

async fn poll_loop(
    name: String,
    store: TaskStore,
    worker: Arc<dyn TaskWorker>,
    lease_secs: i64,
    cancel: CancellationToken,
) {
    info!(queue = %name, "task queue polling started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)) => {}
        }

        // Tasks abandoned by a dead worker go back to the queue first
        match store.reclaim_stale(&name, lease_secs).await {
            Ok(0) => {}
            Ok(reclaimed) => warn!(queue = %name, reclaimed, "re-queued stale running tasks"),
            Err(e) => error!(queue = %name, error = %e, "failed to reclaim stale tasks"),
        }

        // Drain everything claimable before sleeping again
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match store.claim_next(&name).await {
                Ok(Some(task)) => run_task(&store, worker.as_ref(), task).await,
                Ok(None) => break,
                Err(e) => {
                    error!(queue = %name, error = %e, "failed to poll for tasks");
                    break;
                }
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }
    info!(queue = %name, "task queue polling stopped");
}

async fn run_task(store: &TaskStore, worker: &dyn TaskWorker, task: TaskRow) {
    let task_id = task.task_id;
    info!(task_id, "task started");

    let payload: Value = match serde_json::from_str(&task.payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(task_id, error = %e, "task payload is not valid JSON");
            if let Err(e) = store.fail(&task_id, &e.to_string()).await {
                error!(task_id, error = %e, "failed to record task failure");
            }
            return;
        }
    };

    let handle = ProgressHandle {
        store: store.clone(),
        task_id: task_id.clone(),
    };
    match worker.run(&task_id, payload, handle).await {
        Ok(result) => {
            if let Err(e) = store.complete(&task_id, &result).await {
                error!(task_id, error = %e, "failed to record task completion");
            } else {
                info!(task_id, "task completed");
            }
        }
        Err(e) => {
            warn!(task_id, error = %e, "task failed");
            if let Err(e) = store.fail(&task_id, &e.to_string()).await {
                error!(task_id, error = %e, "failed to record task failure");
            }
        }
    }
}
