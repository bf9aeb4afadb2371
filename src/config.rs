//! Configuration types for script-bundler

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Library configuration
///
/// Works out of the box with defaults pointing at the UAT hub proxy; embedding
/// processes usually deserialize this from their own config file and pass it
/// to [`crate::BundleService::new`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Script hub endpoint URL (default: the UAT proxy)
    ///
    /// A trailing `/` is appended if missing.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    /// Path of the SQLite file backing the task queue (default: "./data/tasks.db")
    #[serde(default = "default_queue_db")]
    pub queue_db: PathBuf,

    /// Name of the task queue the CSV bundle worker consumes (default: "bundle")
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Directory finished bundles are written into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_hub_url() -> String {
    "http://203.67.19.129/xsserviceuat/".to_string()
}

fn default_queue_db() -> PathBuf {
    PathBuf::from("./data/tasks.db")
}

fn default_queue_name() -> String {
    "bundle".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hub_url: default_hub_url(),
            queue_db: default_queue_db(),
            queue_name: default_queue_name(),
            download_dir: default_download_dir(),
        }
    }
}
