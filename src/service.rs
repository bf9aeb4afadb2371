//! Service composition root
//!
//! Wires the hub client, bundler, and task queue together from a [`Config`]
//! and registers the CSV manifest flow as the queue's worker. The explicit
//! and per-user bundle flows stay synchronous through [`BundleService::bundler`];
//! only manifest bundling goes through the queue.

use crate::bundle::{BundleTarget, Bundler};
use crate::config::Config;
use crate::error::Result;
use crate::hub::HubClient;
use crate::queue::{ProgressHandle, TaskQueue, TaskStatus, TaskStore, TaskWorker};
use crate::types::{BundleOption, CsvOption};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Parameters for one queued manifest bundle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CsvBundlePayload {
    /// Path to the CSV manifest
    pub csv_path: PathBuf,
    /// Bundle target; a `.zip` suffix means an archive, anything else a
    /// directory root
    pub target: PathBuf,
    /// How to interpret the manifest columns
    pub csv_option: CsvOption,
    /// Bundle layout policy
    #[serde(default)]
    pub bundle_option: BundleOption,
}

/// Queue worker that runs the manifest bundle flow
struct CsvBundleWorker {
    bundler: Bundler,
}

#[async_trait]
impl TaskWorker for CsvBundleWorker {
    async fn run(&self, task_id: &str, payload: Value, progress: ProgressHandle) -> Result<Value> {
        let payload: CsvBundlePayload = serde_json::from_value(payload)?;
        info!(task_id, manifest = %payload.csv_path.display(), "manifest bundle task started");

        let summary = self
            .bundler
            .bundle_from_csv(
                &payload.csv_path,
                &payload.csv_option,
                BundleTarget::from_path(&payload.target),
                &payload.bundle_option,
                |value| {
                    let handle = progress.clone();
                    async move {
                        handle.report(&value).await;
                    }
                },
            )
            .await?;

        Ok(serde_json::to_value(summary)?)
    }
}

/// The assembled bundling service
///
/// Owns the queue for its lifetime; status queries and synchronous bundle
/// flows borrow the shared hub client.
pub struct BundleService {
    config: Config,
    bundler: Bundler,
    queue: TaskQueue,
}

impl BundleService {
    /// Build the service from configuration
    ///
    /// Opens (or creates) the task database and starts the queue's polling
    /// loop immediately, so tasks left over from a previous run resume
    /// without any further call.
    pub async fn new(config: Config) -> Result<Self> {
        let hub = Arc::new(HubClient::new(&config.hub_url)?);
        let bundler = Bundler::new(hub);
        let store = TaskStore::new(&config.queue_db).await?;
        let worker = Arc::new(CsvBundleWorker {
            bundler: bundler.clone(),
        });
        let queue = TaskQueue::new(config.queue_name.clone(), store, worker);

        info!(hub = %config.hub_url, queue = %config.queue_name, "bundle service started");
        Ok(Self {
            config,
            bundler,
            queue,
        })
    }

    /// The synchronous bundle flows
    pub fn bundler(&self) -> &Bundler {
        &self.bundler
    }

    /// The hub client the service resolves against
    pub fn hub(&self) -> &HubClient {
        self.bundler.hub()
    }

    /// The service configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Enqueue a manifest bundle task
    ///
    /// A relative target path is placed under the configured download
    /// directory. Returns once the task is durably enqueued.
    pub async fn enqueue_csv_bundle(
        &self,
        task_id: &str,
        mut payload: CsvBundlePayload,
    ) -> Result<()> {
        if payload.target.is_relative() {
            payload.target = self.config.download_dir.join(&payload.target);
        }
        self.queue.add(task_id, serde_json::to_value(&payload)?).await
    }

    /// Whether a queued task has completed; see [`TaskQueue::is_task_finished`]
    pub async fn is_task_finished(&self, task_id: &str) -> Result<bool> {
        self.queue.is_task_finished(task_id).await
    }

    /// A queued task's current state
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        self.queue.task_status(task_id).await
    }

    /// A completed task's bundle summary
    pub async fn get_task_return_value(&self, task_id: &str) -> Result<Value> {
        self.queue.get_task_return_value(task_id).await
    }

    /// A task's most recent progress value
    pub async fn get_task_progress(&self, task_id: &str) -> Result<Option<String>> {
        self.queue.get_task_progress(task_id).await
    }

    /// Stop the queue, discarding queued tasks
    pub async fn shutdown(&self) -> Result<()> {
        self.queue.close().await
    }
}
