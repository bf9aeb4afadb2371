//! Query composition and response parsing for the hub protocol
//!
//! Every query is the same logical "DB query" XML document, disambiguated by
//! a `Type` attribute rather than by distinct endpoints. Responses carry a
//! `status` attribute on the root element; anything non-zero is a protocol
//! error. A zero status with no matching child elements is a valid empty
//! result.

use crate::error::{Error, Result};
use crate::types::{Script, ScriptType, SensorBinding, normalize_folder};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Compose the by-id script query (`Query Type="1"`)
pub fn script_by_id_query(
    app_id: &str,
    user_id: &str,
    script_type: &ScriptType,
    guid: &str,
) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?><DB Type="3"><Query Type="1" AppID="{}" UserID="{}" ID="{}" ScriptType="{}"/></DB>"#,
        escape(&app_id.to_uppercase()),
        escape(&user_id.to_uppercase()),
        escape(guid),
        escape(script_type.code()),
    )
}

/// Compose the by-user-and-type script query (`Query Type="4"`)
pub fn user_scripts_query(app_id: &str, user_id: &str, script_type: &ScriptType) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8" ?><DB Type="3"><Query Type="4" AppID="{}" UserID="{}" ScriptType="{}"/></DB>"#,
        escape(&app_id.to_uppercase()),
        escape(&user_id.to_uppercase()),
        escape(script_type.code()),
    )
}

/// Compose the sensor batch query
pub fn sensor_query(app_id: &str, user_id: &str, sensor_ids: &[String]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="utf-8" ?><UserSensorDB Type="4" AppID="{}" UserID="{}" Version="1">"#,
        escape(&app_id.to_uppercase()),
        escape(&user_id.to_uppercase()),
    );
    for sensor_id in sensor_ids {
        xml.push_str(&format!(r#"<Query SID="{}"/>"#, escape(sensor_id)));
    }
    xml.push_str("</UserSensorDB>");
    xml
}

/// Read one attribute from an element, unescaped
fn attr_value(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::MalformedResponse(e.to_string()))?;
        if attr.key.as_ref() == name {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::MalformedResponse(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Validate the root element's `status` attribute
///
/// A missing attribute counts as `"0"` (success); anything else raises
/// [`Error::Protocol`] with the numeric status (or `-1` if the hub sent a
/// non-numeric value).
fn check_root_status(element: &BytesStart<'_>) -> Result<()> {
    let status = attr_value(element, b"status")?.unwrap_or_else(|| "0".to_string());
    if status == "0" {
        return Ok(());
    }
    Err(Error::Protocol {
        status: status.parse().unwrap_or(-1),
    })
}

/// Partially parsed `<Script>` element
#[derive(Default)]
struct PendingScript {
    script_type: String,
    name: String,
    guid: String,
    folder: String,
    status_mask: String,
    code: String,
}

/// Parse a script query response into resolved scripts
///
/// Rows missing a name, id, or code body are skipped; a response without a
/// `<Scripts>` element is a valid empty result.
pub fn parse_script_response(xml: &str) -> Result<Vec<Script>> {
    let mut reader = Reader::from_str(xml);

    let mut saw_root = false;
    let mut app_id = String::new();
    let mut user_id = String::new();
    let mut pending: Option<PendingScript> = None;
    let mut in_code = false;
    let mut scripts = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if !saw_root {
                    saw_root = true;
                    check_root_status(e)?;
                    continue;
                }
                match e.name().as_ref() {
                    b"Scripts" => {
                        app_id = attr_value(e, b"AppID")?.unwrap_or_default();
                        user_id = attr_value(e, b"UserID")?.unwrap_or_default();
                    }
                    b"Script" => {
                        let script = PendingScript {
                            script_type: attr_value(e, b"Type")?.unwrap_or_default(),
                            name: attr_value(e, b"Name")?.unwrap_or_default(),
                            guid: attr_value(e, b"ID")?.unwrap_or_default(),
                            folder: attr_value(e, b"Folder")?.unwrap_or_default(),
                            status_mask: attr_value(e, b"StatusMask")?
                                .unwrap_or_else(|| "0".to_string()),
                            code: String::new(),
                        };
                        if matches!(event, Event::Empty(_)) {
                            // No children means no code body; the row is dropped
                            continue;
                        }
                        pending = Some(script);
                    }
                    b"Code" if pending.is_some() => {
                        if !matches!(event, Event::Empty(_)) {
                            in_code = true;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if in_code
                    && let Some(script) = pending.as_mut()
                {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::MalformedResponse(e.to_string()))?;
                    script.code.push_str(&text);
                }
            }
            Event::CData(t) => {
                if in_code
                    && let Some(script) = pending.as_mut()
                {
                    script
                        .code
                        .push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"Code" => in_code = false,
                b"Script" => {
                    if let Some(script) = pending.take()
                        && !script.name.is_empty()
                        && !script.guid.is_empty()
                        && !script.code.is_empty()
                    {
                        scripts.push(Script {
                            app_id: app_id.clone(),
                            user_id: user_id.clone(),
                            script_type: script
                                .script_type
                                .parse()
                                .unwrap_or(ScriptType::Other(String::new())),
                            guid: script.guid,
                            name: script.name,
                            folder: normalize_folder(&script.folder),
                            invisible: script.status_mask == "0",
                            code: script.code,
                        });
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(scripts)
}

/// Parse a sensor batch query response
///
/// Sensors whose embedded payload cannot be matched are logged and dropped;
/// they never abort the batch.
pub fn parse_sensor_response(xml: &str) -> Result<Vec<SensorBinding>> {
    let mut reader = Reader::from_str(xml);

    let mut saw_root = false;
    let mut current: Option<(String, String)> = None; // (sensor_id, accumulated text)
    let mut sensors = Vec::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if !saw_root {
                    saw_root = true;
                    check_root_status(e)?;
                    continue;
                }
                if e.name().as_ref() == b"UserSensor" {
                    let sensor_id = attr_value(e, b"SID")?.unwrap_or_default();
                    if matches!(event, Event::Empty(_)) {
                        warn!(sensor_id, "sensor record has no payload, dropping");
                        continue;
                    }
                    current = Some((sensor_id, String::new()));
                }
            }
            Event::Text(ref t) => {
                if let Some((_, text)) = current.as_mut() {
                    let chunk = t
                        .unescape()
                        .map_err(|e| Error::MalformedResponse(e.to_string()))?;
                    text.push_str(&chunk);
                }
            }
            Event::CData(t) => {
                if let Some((_, text)) = current.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(ref e) => {
                if e.name().as_ref() == b"UserSensor"
                    && let Some((sensor_id, text)) = current.take()
                {
                    match extract_sensor_binding(&text) {
                        Some((script_id, group_id)) => sensors.push(SensorBinding {
                            sensor_id,
                            script_id,
                            group_id,
                        }),
                        None => {
                            warn!(sensor_id, "cannot find Script:ID in sensor payload");
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(sensors)
}

/// Best-effort extraction of `(scriptId, groupId)` from a sensor payload
///
/// The hub embeds a JSON-like structure inside an XML text node without
/// consistent encoding, so the payload cannot always be parsed as a
/// standards-compliant document. This matches the literal shape
/// `,"Script":{"ID":"<A>","GroupID":"<B>"` directly against the raw text;
/// the pattern is pinned by unit tests and must not be "fixed" to a
/// structured parse while the upstream data stays inconsistent.
pub(crate) fn extract_sensor_binding(text: &str) -> Option<(String, String)> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    let regex = PATTERN.get_or_init(|| {
        Regex::new(r#","Script":\{"ID":"(.*?)","GroupID":"(.*?)""#).expect("pattern is literal")
    });

    let captures = regex.captures(text)?;
    let script_id = captures.get(1)?.as_str().to_string();
    let group_id = captures.get(2).map(|m| m.as_str()).unwrap_or("").to_string();
    Some((script_id, group_id))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Query composition
    // -----------------------------------------------------------------------

    #[test]
    fn by_id_query_uppercases_identifiers() {
        let xml = script_by_id_query("daq", "yuweiyang", &ScriptType::Sensor, "e9ccfbb8");
        assert!(xml.contains(r#"AppID="DAQ""#));
        assert!(xml.contains(r#"UserID="YUWEIYANG""#));
        assert!(xml.contains(r#"Query Type="1""#));
        assert!(xml.contains(r#"ID="e9ccfbb8""#));
        assert!(xml.contains(r#"ScriptType="3""#));
        assert!(xml.contains(r#"<DB Type="3">"#));
    }

    #[test]
    fn user_scripts_query_uses_type_four() {
        let xml = user_scripts_query("DAQ", "alexchuw", &ScriptType::All);
        assert!(xml.contains(r#"Query Type="4""#));
        assert!(xml.contains(r#"UserID="ALEXCHUW""#));
        assert!(xml.contains(r#"ScriptType="0""#));
        assert!(!xml.contains("ID=\"\""), "by-user query carries no guid");
    }

    #[test]
    fn sensor_query_emits_one_element_per_id() {
        let ids = vec!["S1".to_string(), "S2".to_string()];
        let xml = sensor_query("daq", "user", &ids);
        assert!(xml.contains(r#"<UserSensorDB Type="4" AppID="DAQ" UserID="USER" Version="1">"#));
        assert!(xml.contains(r#"<Query SID="S1"/>"#));
        assert!(xml.contains(r#"<Query SID="S2"/>"#));
        assert!(xml.ends_with("</UserSensorDB>"));
    }

    #[test]
    fn query_escapes_attribute_values() {
        let xml = script_by_id_query("a&b", "u", &ScriptType::Function, "g\"1");
        assert!(xml.contains("A&amp;B"));
        assert!(xml.contains("g&quot;1"));
    }

    // -----------------------------------------------------------------------
    // Script response parsing
    // -----------------------------------------------------------------------

    const SCRIPT_RESPONSE: &str = r#"<Result status="0">
        <Scripts AppID="DAQXQLITE" UserID="UNIDOLF" Version="2" Lang="TW" StatusMask="34">
            <Script Type="3" Name="Arrive Price" ID="902ee595796e4b23882bb2578ab6305c" Folder="/A/B/" StatusMask="34">
                <Desc><![CDATA[]]></Desc>
                <Code><![CDATA[Input: cross_way(1);
Plot1(cross_way);]]></Code>
            </Script>
        </Scripts>
    </Result>"#;

    #[test]
    fn parses_script_with_cdata_code() {
        let scripts = parse_script_response(SCRIPT_RESPONSE).unwrap();
        assert_eq!(scripts.len(), 1);

        let script = &scripts[0];
        assert_eq!(script.app_id, "DAQXQLITE");
        assert_eq!(script.user_id, "UNIDOLF");
        assert_eq!(script.script_type, ScriptType::Sensor);
        assert_eq!(script.guid, "902ee595796e4b23882bb2578ab6305c");
        assert_eq!(script.name, "Arrive Price");
        assert_eq!(script.folder, "/A/B/");
        assert!(!script.invisible, "StatusMask 34 is a visible script");
        assert!(script.code.starts_with("Input: cross_way(1);"));
    }

    #[test]
    fn missing_folder_defaults_to_root() {
        let xml = r#"<Result status="0"><Scripts AppID="A" UserID="U">
            <Script Type="1" Name="f" ID="g1"><Code><![CDATA[x]]></Code></Script>
        </Scripts></Result>"#;
        let scripts = parse_script_response(xml).unwrap();
        assert_eq!(scripts[0].folder, "/");
    }

    #[test]
    fn missing_status_mask_means_invisible() {
        let xml = r#"<Result status="0"><Scripts AppID="A" UserID="U">
            <Script Type="1" Name="f" ID="g1"><Code><![CDATA[x]]></Code></Script>
        </Scripts></Result>"#;
        let scripts = parse_script_response(xml).unwrap();
        assert!(scripts[0].invisible);
    }

    #[test]
    fn rows_without_name_id_or_code_are_skipped() {
        let xml = r#"<Result status="0"><Scripts AppID="A" UserID="U">
            <Script Type="1" ID="g1"><Code><![CDATA[x]]></Code></Script>
            <Script Type="1" Name="no-guid"><Code><![CDATA[x]]></Code></Script>
            <Script Type="1" Name="no-code" ID="g2"><Code><![CDATA[]]></Code></Script>
            <Script Type="1" Name="ok" ID="g3"><Code><![CDATA[y]]></Code></Script>
        </Scripts></Result>"#;
        let scripts = parse_script_response(xml).unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name, "ok");
    }

    #[test]
    fn empty_result_without_scripts_element_is_no_data() {
        let scripts = parse_script_response(r#"<Result status="0"></Result>"#).unwrap();
        assert!(scripts.is_empty());
    }

    #[test]
    fn nonzero_status_raises_protocol_error() {
        let err = parse_script_response(r#"<Result status="7"></Result>"#).unwrap_err();
        match err {
            Error::Protocol { status } => assert_eq!(status, 7),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_input_is_malformed_response() {
        let err = parse_script_response("<Result status=\"0\"><unclosed").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[test]
    fn unknown_type_code_is_carried_verbatim() {
        let xml = r#"<Result status="0"><Scripts AppID="A" UserID="U">
            <Script Type="9" Name="f" ID="g1"><Code><![CDATA[x]]></Code></Script>
        </Scripts></Result>"#;
        let scripts = parse_script_response(xml).unwrap();
        assert_eq!(scripts[0].script_type, ScriptType::Other("9".into()));
    }

    // -----------------------------------------------------------------------
    // Sensor response parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parses_sensor_bindings_and_drops_bad_payloads() {
        let xml = r#"<Result status="0" version="1">
            <UserSensor SID="S-GOOD"><![CDATA[{"X":1,"Script":{"ID":"sid-1","GroupID":"gid-1","More":2}}]]></UserSensor>
            <UserSensor SID="S-BAD"><![CDATA[{"no":"script here"}]]></UserSensor>
            <UserSensor SID="S-ALSO"><![CDATA[junk,"Script":{"ID":"sid-2","GroupID":""}]]></UserSensor>
        </Result>"#;
        let sensors = parse_sensor_response(xml).unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0].sensor_id, "S-GOOD");
        assert_eq!(sensors[0].script_id, "sid-1");
        assert_eq!(sensors[0].group_id, "gid-1");
        assert_eq!(sensors[1].sensor_id, "S-ALSO");
        assert_eq!(sensors[1].script_id, "sid-2");
        assert_eq!(sensors[1].group_id, "");
    }

    #[test]
    fn sensor_response_without_records_is_empty() {
        let sensors = parse_sensor_response(r#"<Result status="0" version="1"></Result>"#).unwrap();
        assert!(sensors.is_empty());
    }

    // -----------------------------------------------------------------------
    // Pinned extractor pattern. This is a workaround for upstream encoding
    // inconsistency and must keep matching the exact literal shape.
    // -----------------------------------------------------------------------

    #[test]
    fn extractor_matches_the_literal_pattern() {
        let text = r#"{"Name":"s1","Script":{"ID":"abc123","GroupID":"g9","Ver":2}}"#;
        let (script_id, group_id) = extract_sensor_binding(text).unwrap();
        assert_eq!(script_id, "abc123");
        assert_eq!(group_id, "g9");
    }

    #[test]
    fn extractor_accepts_empty_group_id() {
        let text = r#"x,"Script":{"ID":"abc","GroupID":"","rest":1}"#;
        let (script_id, group_id) = extract_sensor_binding(text).unwrap();
        assert_eq!(script_id, "abc");
        assert_eq!(group_id, "");
    }

    #[test]
    fn extractor_requires_the_leading_comma() {
        // Without a preceding field the literal pattern must not match
        assert!(extract_sensor_binding(r#""Script":{"ID":"a","GroupID":"b""#).is_none());
    }

    #[test]
    fn extractor_returns_none_for_unmatched_text() {
        assert!(extract_sensor_binding("not json at all").is_none());
        assert!(extract_sensor_binding(r#"{"Script":{"GroupID":"only"}}"#).is_none());
    }
}
