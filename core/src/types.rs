use crate::snapshot::Snapshot;
use crate::{Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One entry of a [`Snapshot`]. The variant decides which payload fields exist,
/// so a record can never carry both plain content and ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum FileRecord {
    /// Base64-encoded bytes.
    Binary { content: String, mime_type: String },
    /// Verbatim UTF-8 text.
    Text { content: String, mime_type: String },
    /// Base64 ciphertext and IV from the cipher envelope.
    Encrypted {
        ciphertext: String,
        iv: String,
        mime_type: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Binary,
    Text,
    Encrypted,
}

impl FileRecord {
    pub fn binary(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self::Binary {
            content: STANDARD.encode(bytes),
            mime_type: mime_type.into(),
        }
    }

    pub fn text(content: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Binary { .. } => RecordKind::Binary,
            Self::Text { .. } => RecordKind::Text,
            Self::Encrypted { .. } => RecordKind::Encrypted,
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            Self::Binary { mime_type, .. }
            | Self::Text { mime_type, .. }
            | Self::Encrypted { mime_type, .. } => mime_type,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted { .. })
    }

    /// Raw bytes of a binary or text record. Encrypted records need the cipher
    /// envelope and are rejected here.
    pub fn plain_bytes(&self) -> Result<Vec<u8>> {
        match self {
            Self::Binary { content, .. } => STANDARD
                .decode(content)
                .map_err(|e| Error::InvalidBackupFormat(format!("Invalid base64 content: {}", e))),
            Self::Text { content, .. } => Ok(content.as_bytes().to_vec()),
            Self::Encrypted { .. } => Err(Error::Other(
                "Encrypted record has no plain content".to_string(),
            )),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::Text => write!(f, "text"),
            Self::Encrypted => write!(f, "encrypted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub hash: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub size: u64,
    pub metadata: VersionMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: DiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_checksum: Option<String>,
    pub size: SizeChange,
}

impl FileDiff {
    pub fn added(path: impl Into<String>, checksum: String, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Added,
            old_checksum: None,
            new_checksum: Some(checksum),
            size: SizeChange {
                old: None,
                new: Some(size),
            },
        }
    }

    pub fn deleted(path: impl Into<String>, checksum: String, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Deleted,
            old_checksum: Some(checksum),
            new_checksum: None,
            size: SizeChange {
                old: Some(size),
                new: None,
            },
        }
    }

    pub fn modified(
        path: impl Into<String>,
        old: (String, u64),
        new: (String, u64),
    ) -> Self {
        Self {
            path: path.into(),
            kind: DiffKind::Modified,
            old_checksum: Some(old.0),
            new_checksum: Some(new.0),
            size: SizeChange {
                old: Some(old.1),
                new: Some(new.1),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalChanges {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl TotalChanges {
    pub fn tally(differences: &[FileDiff]) -> Self {
        differences.iter().fold(Self::default(), |mut totals, diff| {
            match diff.kind {
                DiffKind::Added => totals.added += 1,
                DiffKind::Modified => totals.modified += 1,
                DiffKind::Deleted => totals.deleted += 1,
            }
            totals
        })
    }

    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

/// Whole-artifact comparison: equal or not, but not what differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionComparison {
    pub is_equal: bool,
    pub is_newer: bool,
    pub local_version: VersionInfo,
    pub remote_version: VersionInfo,
    pub time_diff: u64,
    pub formatted_diff: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedComparison {
    pub is_equal: bool,
    pub is_newer: bool,
    pub local_version: VersionInfo,
    pub remote_version: VersionInfo,
    pub time_diff: u64,
    pub formatted_diff: String,
    pub differences: Vec<FileDiff>,
    pub total_changes: TotalChanges,
    /// Set when the remote side could not be parsed and was compared as empty.
    #[serde(default)]
    pub remote_unreadable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// A whole directory tree.
    #[default]
    Full,
    /// A single key/value namespace.
    Namespace,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Namespace => write!(f, "namespace"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: BackupKind,
    pub version_info: VersionInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(flatten)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    /// Content id assigned by the storage backend.
    pub hash: String,
    pub version_info: VersionInfo,
    pub name: String,
}

/// The persisted `{data, metadata}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupArtifact {
    pub data: Snapshot,
    pub metadata: BackupMetadata,
}
