//! Remote resolution client for the script hub
//!
//! The hub exposes a single URL; every call POSTs a small XML query wrapped
//! in a binary envelope and gets XML back. There is one
//! blocking round-trip per call, no retries, and no timeout beyond the
//! transport default. A failed call surfaces immediately.

use crate::error::Result;
use crate::types::{Script, ScriptType, SensorBinding};
use tracing::{debug, trace};
use url::Url;

mod frame;
mod xml;

pub use frame::{ACTION_SCRIPT_QUERY, ACTION_SENSOR_QUERY, PROTOCOL_VERSION, encode_frame};

/// Client for the script hub's query protocol
///
/// App and user identifiers are case-insensitive at this boundary; the client
/// upper-cases them when composing queries.
#[derive(Debug, Clone)]
pub struct HubClient {
    server: Url,
    http: reqwest::Client,
}

impl HubClient {
    /// Create a client for the hub at `server`
    ///
    /// A trailing `/` is appended if missing.
    pub fn new(server: &str) -> Result<Self> {
        let normalized = if server.ends_with('/') {
            server.to_string()
        } else {
            format!("{}/", server)
        };
        Ok(Self {
            server: Url::parse(&normalized)?,
            http: reqwest::Client::new(),
        })
    }

    /// The configured hub URL
    pub fn server(&self) -> &Url {
        &self.server
    }

    /// Look up one script by its guid
    ///
    /// Returns `Ok(None)` when no record matches; not-found is never an
    /// error.
    pub async fn query_script_by_id(
        &self,
        app_id: &str,
        user_id: &str,
        script_type: &ScriptType,
        guid: &str,
    ) -> Result<Option<Script>> {
        let query = xml::script_by_id_query(app_id, user_id, script_type, guid);
        let response = self.post_request(ACTION_SCRIPT_QUERY, &query).await?;
        let mut scripts = xml::parse_script_response(&response)?;
        if scripts.is_empty() {
            return Ok(None);
        }
        Ok(Some(scripts.remove(0)))
    }

    /// List all of a user's scripts matching the type filter
    ///
    /// [`ScriptType::All`] matches every category.
    pub async fn query_user_scripts(
        &self,
        app_id: &str,
        user_id: &str,
        script_type: &ScriptType,
    ) -> Result<Vec<Script>> {
        let query = xml::user_scripts_query(app_id, user_id, script_type);
        let response = self.post_request(ACTION_SCRIPT_QUERY, &query).await?;
        let scripts = xml::parse_script_response(&response)?;
        debug!(
            app_id,
            user_id,
            script_type = %script_type,
            count = scripts.len(),
            "resolved user scripts"
        );
        Ok(scripts)
    }

    /// Resolve a batch of sensors to the scripts they currently run
    ///
    /// Partial results are allowed: ids the hub does not know are silently
    /// omitted, and sensors with an unreadable payload are logged and
    /// dropped. Absent ids are never per-id errors.
    pub async fn query_sensors(
        &self,
        app_id: &str,
        user_id: &str,
        sensor_ids: &[String],
    ) -> Result<Vec<SensorBinding>> {
        let query = xml::sensor_query(app_id, user_id, sensor_ids);
        let response = self.post_request(ACTION_SENSOR_QUERY, &query).await?;
        xml::parse_sensor_response(&response)
    }

    /// POST one framed XML query and return the response text
    async fn post_request(&self, action: u16, query: &str) -> Result<String> {
        let body = encode_frame(PROTOCOL_VERSION, action, query.as_bytes());
        trace!(action, query, "posting hub request");

        let response = self
            .http
            .post(self.server.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let text = response.text().await?;
        trace!(action, response = %text, "hub response");
        Ok(text)
    }
}

// Convenience for callers holding a `;`-separated id list (the hub's own
// list convention for sensor ids).
/// Split a `;`-separated sensor id list into individual ids
pub fn split_sensor_ids(ids: &str) -> Vec<String> {
    ids.split(';')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
