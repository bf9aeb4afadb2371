//! Bundle orchestration: three flows that all terminate in one [`BundleTask`]
//!
//! The explicit-list and per-user flows run synchronously in the caller's
//! task. The manifest flow walks a CSV file row by row, resolving each row
//! through the hub and reporting `"<line>/<total>"` progress after every
//! physical line; row-level failures are recorded and skipped, never fatal
//! to the batch.

use super::{BundleTarget, BundleTask};
use crate::error::Result;
use crate::hub::HubClient;
use crate::types::{BundleOption, CsvOption, Script, ScriptType};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bundle an already-resolved list of scripts
///
/// Returns the number of scripts written.
pub fn bundle_scripts(
    scripts: &[Script],
    target: BundleTarget,
    options: &BundleOption,
) -> Result<usize> {
    let mut task = BundleTask::new(target)?;
    for script in scripts {
        task.add(script, options)?;
    }
    task.finish()?;
    Ok(scripts.len())
}

/// One skipped manifest row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based physical line number in the manifest
    pub line: usize,
    /// Why the row was skipped
    pub reason: String,
}

/// Outcome of one manifest walk
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvBundleSummary {
    /// Physical lines in the manifest, including header and blank lines
    pub total_lines: usize,
    /// Scripts resolved and written to the bundle
    pub bundled: usize,
    /// Well-formed rows whose guid matched nothing on the hub
    pub not_found: usize,
    /// Rows skipped for missing columns or resolution failures
    pub row_errors: Vec<RowError>,
}

/// Resolves scripts through the hub and feeds them into bundle tasks
#[derive(Clone)]
pub struct Bundler {
    hub: Arc<HubClient>,
}

impl Bundler {
    /// Create a bundler backed by the given hub client
    pub fn new(hub: Arc<HubClient>) -> Self {
        Self { hub }
    }

    /// The hub client this bundler resolves against
    pub fn hub(&self) -> &HubClient {
        &self.hub
    }

    /// Resolve a user's full script set and bundle it
    ///
    /// Returns the number of scripts written; an empty result set still
    /// produces a (valid, empty) target.
    pub async fn bundle_user_scripts(
        &self,
        app_id: &str,
        user_id: &str,
        script_type: &ScriptType,
        target: BundleTarget,
        options: &BundleOption,
    ) -> Result<usize> {
        let scripts = self
            .hub
            .query_user_scripts(app_id, user_id, script_type)
            .await?;
        info!(
            app_id,
            user_id,
            count = scripts.len(),
            "bundling user script set"
        );
        bundle_scripts(&scripts, target, options)
    }

    /// Walk a CSV manifest, resolve each row by guid, and bundle the hits
    ///
    /// Lines are split on line-feed with one trailing empty line (from a
    /// final newline) ignored. The first line is skipped iff
    /// `csv_option.has_header_row`; blank lines are skipped. A row missing
    /// any of the four configured columns, or whose resolution call fails,
    /// is recorded in the summary and skipped. `progress` is called with
    /// `"<line>/<total>"` after every physical line, whatever its outcome.
    pub async fn bundle_from_csv<F, Fut>(
        &self,
        manifest: &Path,
        csv_option: &CsvOption,
        target: BundleTarget,
        options: &BundleOption,
        mut progress: F,
    ) -> Result<CsvBundleSummary>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        let content = tokio::fs::read_to_string(manifest).await?;
        let mut lines: Vec<&str> = content.split('\n').collect();
        if lines.len() > 1 && lines.last().is_some_and(|line| line.trim().is_empty()) {
            lines.pop();
        }
        let total = lines.len();

        let mut task = BundleTask::new(target)?;
        let mut summary = CsvBundleSummary {
            total_lines: total,
            ..CsvBundleSummary::default()
        };

        for (index, raw) in lines.iter().enumerate() {
            let line_no = index + 1;
            'row: {
                if index == 0 && csv_option.has_header_row {
                    break 'row;
                }
                let line = raw.trim();
                if line.is_empty() {
                    break 'row;
                }

                let fields: Vec<&str> = line.split(',').map(str::trim).collect();
                let Some((app_id, user_id, guid, type_code)) = (|| {
                    Some((
                        field(&fields, csv_option.col_app_id)?,
                        field(&fields, csv_option.col_user_id)?,
                        field(&fields, csv_option.col_guid)?,
                        field(&fields, csv_option.col_script_type)?,
                    ))
                })() else {
                    warn!(line = line_no, "manifest row is missing a required column");
                    summary.row_errors.push(RowError {
                        line: line_no,
                        reason: "missing required column".to_string(),
                    });
                    break 'row;
                };

                let script_type = type_code
                    .parse::<ScriptType>()
                    .unwrap_or(ScriptType::Other(type_code.to_string()));
                match self
                    .hub
                    .query_script_by_id(app_id, user_id, &script_type, guid)
                    .await
                {
                    Ok(Some(script)) => {
                        task.add(&script, options)?;
                        summary.bundled += 1;
                    }
                    Ok(None) => {
                        debug!(line = line_no, guid, "no script matches manifest row");
                        summary.not_found += 1;
                    }
                    Err(e) => {
                        warn!(line = line_no, guid, error = %e, "manifest row resolution failed");
                        summary.row_errors.push(RowError {
                            line: line_no,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            progress(format!("{line_no}/{total}")).await;
        }

        task.finish()?;
        info!(
            manifest = %manifest.display(),
            bundled = summary.bundled,
            not_found = summary.not_found,
            errors = summary.row_errors.len(),
            "manifest bundle finished"
        );
        Ok(summary)
    }
}

/// A configured column, or `None` when absent or empty
fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|value| !value.is_empty())
}
