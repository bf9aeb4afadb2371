//! Core types for script-bundler

use serde::{Deserialize, Serialize};

/// Enumerated script category used both for remote filtering and for archive
/// folder naming.
///
/// The wire codes are fixed by the hub protocol (`0,1,2,3,4,7`). Codes the
/// library does not know are carried verbatim in [`ScriptType::Other`] so new
/// categories introduced on the hub side pass through unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScriptType {
    /// Matches every category in queries; never appears on a resolved script
    All,
    /// User-defined function
    Function,
    /// Indicator script
    Indicator,
    /// Sensor script
    Sensor,
    /// Stock filter script
    Filter,
    /// Automated trading script
    AutoTrade,
    /// Unrecognized wire code, preserved verbatim
    Other(String),
}

impl ScriptType {
    /// The wire code sent to (and received from) the hub
    pub fn code(&self) -> &str {
        match self {
            ScriptType::All => "0",
            ScriptType::Function => "1",
            ScriptType::Indicator => "2",
            ScriptType::Sensor => "3",
            ScriptType::Filter => "4",
            ScriptType::AutoTrade => "7",
            ScriptType::Other(code) => code,
        }
    }

    /// Folder name used for this category inside a bundle
    ///
    /// The five named categories map to fixed human-readable folder names;
    /// anything else (including `All`, which never names a resolved script)
    /// echoes its wire code verbatim.
    pub fn folder_name(&self) -> &str {
        match self {
            ScriptType::Function => "Function",
            ScriptType::Indicator => "Indicator",
            ScriptType::Sensor => "Sensor",
            ScriptType::Filter => "Filter",
            ScriptType::AutoTrade => "AutoTrade",
            other => other.code(),
        }
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for ScriptType {
    type Err = std::convert::Infallible;

    /// Accepts a wire code or a case-insensitive category name
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let ty = match s {
            "0" => ScriptType::All,
            "1" => ScriptType::Function,
            "2" => ScriptType::Indicator,
            "3" => ScriptType::Sensor,
            "4" => ScriptType::Filter,
            "7" => ScriptType::AutoTrade,
            other => match other.to_ascii_lowercase().as_str() {
                "all" => ScriptType::All,
                "function" => ScriptType::Function,
                "indicator" => ScriptType::Indicator,
                "sensor" => ScriptType::Sensor,
                "filter" => ScriptType::Filter,
                "autotrade" => ScriptType::AutoTrade,
                _ => ScriptType::Other(other.to_string()),
            },
        };
        Ok(ty)
    }
}

/// One script resolved from the hub
///
/// Constructed only by the hub response parser and immutable afterwards; the
/// library never persists scripts except transiently inside a bundle.
#[derive(Clone, Debug, PartialEq)]
pub struct Script {
    /// Tenant identifier, upper-case normalized
    pub app_id: String,
    /// Owner identifier, upper-case normalized
    pub user_id: String,
    /// Script category
    pub script_type: ScriptType,
    /// Opaque unique id issued by the hub
    pub guid: String,
    /// Script display name
    pub name: String,
    /// Virtual folder path; always ends with `/`, default `/`
    pub folder: String,
    /// Whether the code body is hidden in user-facing listings
    pub invisible: bool,
    /// Raw source text; the hub uses CRLF line separators
    pub code: String,
}

impl Script {
    /// Render this script as bundle file content
    ///
    /// A fixed four-line header (`User`, `Type`, `Path`, `ID`) followed by
    /// the raw code, matching the hub's CRLF line convention.
    pub fn as_file_content(&self) -> String {
        format!(
            "User: {}/{}\r\nType: {}\r\nPath: {}\r\nID: {}\r\n{}",
            self.app_id,
            self.user_id,
            self.script_type.folder_name(),
            self.folder,
            self.guid,
            self.code
        )
    }

    /// Bundle filename for this script: `^`-prefixed when invisible, `.xs`
    /// extension
    pub fn file_name(&self) -> String {
        let marker = if self.invisible { "^" } else { "" };
        format!("{}{}.xs", marker, self.name)
    }
}

/// Normalize a virtual folder path so it always ends with a separator
///
/// Empty input becomes the root folder `/`.
pub(crate) fn normalize_folder(folder: &str) -> String {
    if folder.is_empty() {
        return "/".to_string();
    }
    if folder.ends_with('/') {
        folder.to_string()
    } else {
        format!("{}/", folder)
    }
}

/// One sensor resolved from the hub: the script it currently runs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensorBinding {
    /// The sensor's own id, as queried
    pub sensor_id: String,
    /// Id of the script bound to the sensor
    pub script_id: String,
    /// Group id of the bound script; empty when the hub reports none
    pub group_id: String,
}

/// How to interpret an input manifest
///
/// The four column indices are zero-based positions the caller asserts exist
/// and must be distinct. A missing required field in a row is a row-level
/// error, never fatal to the batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvOption {
    /// Whether the first line is a header row to skip
    pub has_header_row: bool,
    /// Column index of the app id
    pub col_app_id: usize,
    /// Column index of the user id
    pub col_user_id: usize,
    /// Column index of the script type code
    pub col_script_type: usize,
    /// Column index of the script guid
    pub col_guid: usize,
}

/// Bundle layout policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleOption {
    /// Prefix every entry with `appId/userId/`
    #[serde(default)]
    pub user_prefix: bool,
    /// Mirror the script's virtual folder and name (default). When false,
    /// entries are flattened to a zero-padded sequence number scoped to
    /// `(appId, userId, scriptType)` and the virtual folder is discarded.
    #[serde(default = "default_keep_folder")]
    pub keep_folder: bool,
}

fn default_keep_folder() -> bool {
    true
}

impl Default for BundleOption {
    fn default() -> Self {
        Self {
            user_prefix: false,
            keep_folder: true,
        }
    }
}
