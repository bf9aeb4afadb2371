//! Bundle assembly: maps resolved scripts into an archive or directory tree
//!
//! A [`BundleTask`] accumulates scripts one at a time and writes them either
//! into a streaming zip archive or as loose files under a directory root.
//! The target kind is decided once at construction and carried as a tagged
//! variant, never re-derived from the path.
//!
//! ```no_run
//! use script_bundler::bundle::{BundleTarget, BundleTask};
//! use script_bundler::types::BundleOption;
//!
//! # fn example(scripts: Vec<script_bundler::types::Script>) -> script_bundler::Result<()> {
//! let mut task = BundleTask::new(BundleTarget::from_path("out/scripts.zip"))?;
//! for script in &scripts {
//!     task.add(script, &BundleOption::default())?;
//! }
//! task.finish()?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::types::{BundleOption, Script};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipWriter;
use zip::write::FileOptions;

mod bundler;

pub use bundler::{Bundler, CsvBundleSummary, RowError, bundle_scripts};

/// Where a bundle is written
///
/// Decided once when the task is constructed. [`BundleTarget::from_path`]
/// applies the `.zip`-suffix convention at the boundary; everything after
/// that dispatches on the variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BundleTarget {
    /// A compressed zip archive at this path
    Archive(PathBuf),
    /// Loose files under this directory root
    Directory(PathBuf),
}

impl BundleTarget {
    /// Classify a target path: a `.zip` suffix (case-insensitive) means an
    /// archive, anything else a directory root
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let is_zip = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            BundleTarget::Archive(path)
        } else {
            BundleTarget::Directory(path)
        }
    }

    /// The target path on disk
    pub fn path(&self) -> &Path {
        match self {
            BundleTarget::Archive(path) | BundleTarget::Directory(path) => path,
        }
    }
}

/// Per-key sequence counter key: `(appId, userId, scriptType code)`
type SequenceKey = (String, String, String);

enum Output {
    Archive(ZipWriter<File>),
    Directory(PathBuf),
}

/// Accumulates scripts into one bundle
///
/// `add` calls mutate a shared writer and the sequence counters, so they must
/// be serialized by the caller; writer errors propagate synchronously from
/// `add` and `finish`. The target must not be read before [`finish`] returns.
///
/// [`finish`]: BundleTask::finish
pub struct BundleTask {
    output: Output,
    sequences: HashMap<SequenceKey, u32>,
}

impl BundleTask {
    /// Open a bundle task for the given target
    ///
    /// Archive mode creates (or truncates) the zip file immediately;
    /// directory mode only records the root and creates directories lazily
    /// per entry.
    pub fn new(target: BundleTarget) -> Result<Self> {
        let output = match target {
            BundleTarget::Archive(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)?;
                }
                Output::Archive(ZipWriter::new(File::create(&path)?))
            }
            BundleTarget::Directory(path) => Output::Directory(path),
        };
        Ok(Self {
            output,
            sequences: HashMap::new(),
        })
    }

    /// Add one script under the layout policy
    pub fn add(&mut self, script: &Script, options: &BundleOption) -> Result<()> {
        let entry = self.entry_path(script, options);
        let content = script.as_file_content();
        debug!(entry, guid = %script.guid, "adding script to bundle");

        match &mut self.output {
            Output::Archive(writer) => {
                let file_options =
                    FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
                writer.start_file(entry, file_options)?;
                writer.write_all(content.as_bytes())?;
            }
            Output::Directory(root) => {
                let full_path = root.join(&entry);
                if let Some(parent) = full_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&full_path, content)?;
            }
        }
        Ok(())
    }

    /// Flush and close the bundle
    ///
    /// Closes the zip central directory in archive mode; a no-op for
    /// directory mode. The target is complete only once this returns.
    pub fn finish(self) -> Result<()> {
        match self.output {
            Output::Archive(mut writer) => {
                writer.finish()?;
            }
            Output::Directory(_) => {}
        }
        Ok(())
    }

    /// Compute the bundle-relative entry path for one script
    ///
    /// `base = (user_prefix ? "APP/USER/" : "") + folder_name(type)`; with
    /// `keep_folder` the script's virtual folder and name are mirrored,
    /// otherwise the name is a dense per-key 5-digit sequence and the virtual
    /// folder is discarded.
    fn entry_path(&mut self, script: &Script, options: &BundleOption) -> String {
        let mut base = String::new();
        if options.user_prefix {
            base.push_str(&script.app_id);
            base.push('/');
            base.push_str(&script.user_id);
            base.push('/');
        }
        base.push_str(script.script_type.folder_name());

        if options.keep_folder {
            // `folder` always starts and ends with `/`
            format!("{}{}{}", base, script.folder, script.file_name())
        } else {
            let key = (
                script.app_id.clone(),
                script.user_id.clone(),
                script.script_type.code().to_string(),
            );
            let sequence = self.sequences.entry(key).or_insert(0);
            *sequence += 1;
            format!("{}/{:05}.xs", base, sequence)
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScriptType;
    use std::io::Read;
    use tempfile::TempDir;

    fn script(name: &str, script_type: ScriptType, folder: &str) -> Script {
        Script {
            app_id: "DAQ".into(),
            user_id: "ALEXCHUW".into(),
            script_type,
            guid: format!("guid-{name}"),
            name: name.into(),
            folder: folder.into(),
            invisible: false,
            code: format!("// {name}\r\n"),
        }
    }

    fn zip_entry_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn from_path_classifies_by_zip_suffix() {
        assert!(matches!(
            BundleTarget::from_path("/tmp/out.zip"),
            BundleTarget::Archive(_)
        ));
        assert!(matches!(
            BundleTarget::from_path("/tmp/OUT.ZIP"),
            BundleTarget::Archive(_)
        ));
        assert!(matches!(
            BundleTarget::from_path("/tmp/out"),
            BundleTarget::Directory(_)
        ));
        assert!(matches!(
            BundleTarget::from_path("/tmp/out.zip.d"),
            BundleTarget::Directory(_)
        ));
    }

    #[test]
    fn archive_mode_mirrors_type_and_folder() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");

        let mut task = BundleTask::new(BundleTarget::from_path(&zip_path)).unwrap();
        task.add(
            &script("ma", ScriptType::Indicator, "/A/B/"),
            &BundleOption::default(),
        )
        .unwrap();
        task.finish().unwrap();

        assert_eq!(zip_entry_names(&zip_path), vec!["Indicator/A/B/ma.xs"]);
    }

    #[test]
    fn user_prefix_prepends_app_and_user() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");

        let options = BundleOption {
            user_prefix: true,
            keep_folder: true,
        };
        let mut task = BundleTask::new(BundleTarget::from_path(&zip_path)).unwrap();
        task.add(&script("f", ScriptType::Function, "/"), &options)
            .unwrap();
        task.finish().unwrap();

        assert_eq!(
            zip_entry_names(&zip_path),
            vec!["DAQ/ALEXCHUW/Function/f.xs"]
        );
    }

    #[test]
    fn invisible_scripts_get_caret_prefix() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");

        let mut hidden = script("secret", ScriptType::Filter, "/");
        hidden.invisible = true;

        let mut task = BundleTask::new(BundleTarget::from_path(&zip_path)).unwrap();
        task.add(&hidden, &BundleOption::default()).unwrap();
        task.finish().unwrap();

        assert_eq!(zip_entry_names(&zip_path), vec!["Filter/^secret.xs"]);
    }

    #[test]
    fn flattened_sequence_is_dense_per_key_regardless_of_add_order() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");

        let options = BundleOption {
            user_prefix: false,
            keep_folder: false,
        };
        let mut task = BundleTask::new(BundleTarget::from_path(&zip_path)).unwrap();
        // Interleave two keys; each must count independently
        task.add(&script("a", ScriptType::Function, "/X/"), &options)
            .unwrap();
        task.add(&script("b", ScriptType::Indicator, "/Y/"), &options)
            .unwrap();
        task.add(&script("c", ScriptType::Function, "/Z/"), &options)
            .unwrap();
        task.add(&script("d", ScriptType::Indicator, "/"), &options)
            .unwrap();
        task.add(&script("e", ScriptType::Function, "/"), &options)
            .unwrap();
        task.finish().unwrap();

        assert_eq!(
            zip_entry_names(&zip_path),
            vec![
                "Function/00001.xs",
                "Indicator/00001.xs",
                "Function/00002.xs",
                "Indicator/00002.xs",
                "Function/00003.xs",
            ]
        );
    }

    #[test]
    fn flattened_sequence_is_scoped_to_user_too() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");

        let options = BundleOption {
            user_prefix: true,
            keep_folder: false,
        };
        let mut first = script("a", ScriptType::Function, "/");
        let mut second = script("b", ScriptType::Function, "/");
        second.user_id = "OTHER".into();
        first.guid = "g1".into();
        second.guid = "g2".into();

        let mut task = BundleTask::new(BundleTarget::from_path(&zip_path)).unwrap();
        task.add(&first, &options).unwrap();
        task.add(&second, &options).unwrap();
        task.finish().unwrap();

        assert_eq!(
            zip_entry_names(&zip_path),
            vec![
                "DAQ/ALEXCHUW/Function/00001.xs",
                "DAQ/OTHER/Function/00001.xs",
            ]
        );
    }

    #[test]
    fn directory_mode_writes_loose_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("out");

        let mut task = BundleTask::new(BundleTarget::from_path(&root)).unwrap();
        task.add(
            &script("ma", ScriptType::Indicator, "/A/"),
            &BundleOption::default(),
        )
        .unwrap();
        task.add(
            &script("sen", ScriptType::Sensor, "/"),
            &BundleOption::default(),
        )
        .unwrap();
        task.finish().unwrap();

        let mut files: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        files.sort();

        assert_eq!(files, vec!["Indicator/A/ma.xs", "Sensor/sen.xs"]);
    }

    #[test]
    fn entry_content_is_the_rendered_file() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");

        let sample = script("ma", ScriptType::Indicator, "/A/");
        let mut task = BundleTask::new(BundleTarget::from_path(&zip_path)).unwrap();
        task.add(&sample, &BundleOption::default()).unwrap();
        task.finish().unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut entry = archive.by_name("Indicator/A/ma.xs").unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();

        assert_eq!(content, sample.as_file_content());
        assert!(content.starts_with("User: DAQ/ALEXCHUW\r\n"));
    }

    #[test]
    fn unknown_type_folder_passes_through_in_paths() {
        let temp = TempDir::new().unwrap();
        let zip_path = temp.path().join("bundle.zip");

        let mut task = BundleTask::new(BundleTarget::from_path(&zip_path)).unwrap();
        task.add(
            &script("new", ScriptType::Other("9".into()), "/"),
            &BundleOption::default(),
        )
        .unwrap();
        task.finish().unwrap();

        assert_eq!(zip_entry_names(&zip_path), vec!["9/new.xs"]);
    }
}
