//! Parsing of self-hosted update manifests.
//!
//! A manifest is a small XML or JSON document describing the latest release:
//!
//! ```xml
//! <update>
//!   <versionName>2.0</versionName>
//!   <versionCode>5</versionCode>
//!   <url>https://example.com/app-2.0.apk</url>
//!   <releaseNotes>Bug fixes</releaseNotes>
//! </update>
//! ```
//!
//! ```json
//! {"versionName": "2.0", "versionCode": 5, "url": "https://example.com/app-2.0.apk"}
//! ```
//!
//! The element and key names are agreed between the app and whoever hosts the
//! manifest, so they come from [`ManifestFields`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::UpdateError;
use crate::version::VersionRecord;

const DOCUMENT_FIELD: &str = "document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    Xml,
    Json,
}

impl ManifestFormat {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element (XML) or key (JSON) names used by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFields {
    #[serde(default = "default_version_name")]
    pub version_name: String,

    #[serde(default = "default_version_code")]
    pub version_code: String,

    #[serde(default = "default_download_url")]
    pub download_url: String,

    #[serde(default = "default_release_notes")]
    pub release_notes: String,
}

fn default_version_name() -> String {
    "versionName".to_string()
}

fn default_version_code() -> String {
    "versionCode".to_string()
}

fn default_download_url() -> String {
    "url".to_string()
}

fn default_release_notes() -> String {
    "releaseNotes".to_string()
}

impl Default for ManifestFields {
    fn default() -> Self {
        Self {
            version_name: default_version_name(),
            version_code: default_version_code(),
            download_url: default_download_url(),
            release_notes: default_release_notes(),
        }
    }
}

/// Parse a manifest payload into a [`VersionRecord`].
///
/// # Errors
/// Returns [`UpdateError::Parse`] naming the offending field when the payload
/// is malformed, a required field is missing, or a field has the wrong type.
pub fn parse_manifest(
    format: ManifestFormat,
    fields: &ManifestFields,
    payload: &str,
) -> Result<VersionRecord, UpdateError> {
    match format {
        ManifestFormat::Xml => parse_xml(fields, payload),
        ManifestFormat::Json => parse_json(fields, payload),
    }
}

fn parse_xml(fields: &ManifestFields, payload: &str) -> Result<VersionRecord, UpdateError> {
    let document = roxmltree::Document::parse(payload)
        .map_err(|error| UpdateError::parse(DOCUMENT_FIELD, error.to_string()))?;
    let root = document.root_element();

    let child_text = |name: &str| -> Option<String> {
        root.children()
            .find(|node| node.is_element() && node.tag_name().name() == name)
            .map(|node| node.text().unwrap_or_default().trim().to_string())
    };

    let version_name = required(&fields.version_name, child_text(&fields.version_name))?;
    let download_url = required(&fields.download_url, child_text(&fields.download_url))?;
    let version_code = child_text(&fields.version_code)
        .map(|raw| parse_code_text(&fields.version_code, &raw))
        .transpose()?;
    let release_notes = child_text(&fields.release_notes).filter(|notes| !notes.is_empty());

    Ok(VersionRecord {
        version_name,
        version_code,
        download_url,
        release_notes,
    })
}

fn parse_json(fields: &ManifestFields, payload: &str) -> Result<VersionRecord, UpdateError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|error| UpdateError::parse(DOCUMENT_FIELD, error.to_string()))?;
    let Value::Object(object) = value else {
        return Err(UpdateError::parse(
            DOCUMENT_FIELD,
            "expected a JSON object at the top level",
        ));
    };

    let string_field = |name: &str| -> Result<Option<String>, UpdateError> {
        match object.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.trim().to_string())),
            Some(other) => Err(UpdateError::parse(
                name,
                format!("expected a string, found {}", json_type(other)),
            )),
        }
    };

    let version_name = required(&fields.version_name, string_field(&fields.version_name)?)?;
    let download_url = required(&fields.download_url, string_field(&fields.download_url)?)?;

    let version_code = match object.get(&fields.version_code) {
        None | Some(Value::Null) => None,
        Some(Value::Number(number)) => Some(number.as_u64().ok_or_else(|| {
            UpdateError::parse(
                &fields.version_code,
                format!("expected a non-negative integer, found {number}"),
            )
        })?),
        Some(other) => {
            return Err(UpdateError::parse(
                &fields.version_code,
                format!("expected a number, found {}", json_type(other)),
            ));
        }
    };

    let release_notes = match object.get(&fields.release_notes) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_string()),
        Some(Value::Array(lines)) => Some(
            lines
                .iter()
                .map(|line| {
                    line.as_str().map(str::trim).ok_or_else(|| {
                        UpdateError::parse(
                            &fields.release_notes,
                            format!("expected an array of strings, found {}", json_type(line)),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
                .join("\n"),
        ),
        Some(other) => {
            return Err(UpdateError::parse(
                &fields.release_notes,
                format!("expected a string, found {}", json_type(other)),
            ));
        }
    }
    .filter(|notes| !notes.is_empty());

    Ok(VersionRecord {
        version_name,
        version_code,
        download_url,
        release_notes,
    })
}

fn required(field: &str, value: Option<String>) -> Result<String, UpdateError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        Some(_) => Err(UpdateError::parse(field, "value is empty")),
        None => Err(UpdateError::parse(field, "field is missing")),
    }
}

fn parse_code_text(field: &str, raw: &str) -> Result<u64, UpdateError> {
    raw.parse::<u64>().map_err(|error| {
        UpdateError::parse(field, format!("'{raw}' is not a non-negative integer: {error}"))
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
