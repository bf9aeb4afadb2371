//! # script-bundler
//!
//! Backend library for exporting trading-platform scripts as downloadable
//! bundles.
//!
//! Scripts live in a remote repository ("hub") reached over a framed XML
//! protocol. This crate resolves them (one by guid, a user's full set, or an
//! arbitrary set described by a CSV manifest), renders each as a headered
//! `.xs` file, and assembles the results into a zip archive or a directory
//! tree. Manifest bundling runs through a durable background task queue so a
//! client can poll for completion instead of blocking a request thread.
//!
//! ## Quick Start
//!
//! ```no_run
//! use script_bundler::{BundleService, Config, CsvBundlePayload, CsvOption};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = BundleService::new(Config::default()).await?;
//!
//!     service
//!         .enqueue_csv_bundle(
//!             "job-1",
//!             CsvBundlePayload {
//!                 csv_path: "manifest.csv".into(),
//!                 target: "scripts.zip".into(),
//!                 csv_option: CsvOption {
//!                     has_header_row: true,
//!                     col_app_id: 0,
//!                     col_user_id: 1,
//!                     col_guid: 2,
//!                     col_script_type: 3,
//!                 },
//!                 bundle_option: Default::default(),
//!             },
//!         )
//!         .await?;
//!
//!     while !service.is_task_finished("job-1").await? {
//!         tokio::time::sleep(std::time::Duration::from_millis(200)).await;
//!     }
//!     println!("{}", service.get_task_return_value("job-1").await?);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Bundle assembly and orchestration
pub mod bundle;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Remote script-resolution client
pub mod hub;
/// Durable background task queue
pub mod queue;
/// Service composition root
pub mod service;
/// Core domain types
pub mod types;

pub use bundle::{BundleTarget, BundleTask, Bundler, CsvBundleSummary, RowError, bundle_scripts};
pub use config::Config;
pub use error::{DatabaseError, Error, Result};
pub use hub::{HubClient, split_sensor_ids};
pub use queue::{ProgressHandle, TaskQueue, TaskStatus, TaskStore, TaskWorker};
pub use service::{BundleService, CsvBundlePayload};
pub use types::{BundleOption, CsvOption, Script, ScriptType, SensorBinding};
