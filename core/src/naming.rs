//! Backup names and flat metadata maps.

use crate::{BackupMetadata, Error, Result};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// `512 B`, `1.5 KB`, `2.0 MB`, `1.2 GB`.
pub fn format_size(bytes: u64) -> String {
    let size = bytes as f64;
    if size < KB {
        format!("{} B", bytes)
    } else if size < MB {
        format!("{:.1} KB", size / KB)
    } else if size < GB {
        format!("{:.1} MB", size / MB)
    } else {
        format!("{:.1} GB", size / GB)
    }
}

/// ISO-8601 UTC with `:` and `.` replaced so the result is safe in file and pin names.
pub fn sanitized_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// `<prefix>-<type>-<size>[-<tags>]-<timestamp>`, e.g.
/// `backup-full-1.5KB-nightly_db-2026-10-19T08-30-00-000Z`.
pub fn generate_backup_name(prefix: &str, metadata: &BackupMetadata) -> String {
    let mut parts = vec![
        prefix.to_string(),
        metadata.kind.to_string(),
        format_size(metadata.version_info.size).replace(' ', ""),
    ];

    let tags: Vec<String> = metadata
        .tags
        .iter()
        .flatten()
        .map(|tag| sanitize_segment(tag))
        .filter(|tag| !tag.is_empty())
        .collect();
    if !tags.is_empty() {
        parts.push(tags.join("_"));
    }

    parts.push(sanitized_timestamp(metadata.timestamp));
    parts.join("-")
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// A value storage backends with flat key/value metadata can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// Reduces any serializable object to a flat map. Nested arrays and objects are
/// JSON-stringified; nulls are dropped. Dates arrive as ISO strings through
/// their serde representation.
pub fn serialize_metadata<T: Serialize + ?Sized>(value: &T) -> Result<BTreeMap<String, MetadataValue>> {
    let Value::Object(fields) = serde_json::to_value(value)? else {
        return Err(Error::Other(
            "Metadata must serialize to an object".to_string(),
        ));
    };

    let mut flat = BTreeMap::new();
    for (key, value) in fields {
        let flattened = match value {
            Value::Null => continue,
            Value::Bool(b) => MetadataValue::Bool(b),
            Value::Number(n) => MetadataValue::Number(n),
            Value::String(s) => MetadataValue::String(s),
            nested @ (Value::Array(_) | Value::Object(_)) => {
                MetadataValue::String(serde_json::to_string(&nested)?)
            }
        };
        flat.insert(key, flattened);
    }
    Ok(flat)
}
