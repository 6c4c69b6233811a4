use crate::classify::{self, ContentClass};
use crate::crypto::{CipherAlgorithm, CipherEnvelope, sha256_hex};
use crate::walker::{PatternFilter, WalkEntry, Walker};
use crate::{Error, FileRecord, Result};
use futures::{StreamExt, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Point-in-time map of normalized relative paths to file records.
///
/// Entries are kept sorted, so the JSON encoding is canonical and checksums
/// never depend on filesystem iteration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: BTreeMap<String, FileRecord>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts under the normalized form of `path`, replacing any previous record.
    pub fn insert(&mut self, path: impl AsRef<str>, record: FileRecord) -> Option<FileRecord> {
        self.entries.insert(normalize_path(path.as_ref()), record)
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.entries.get(&normalize_path(path))
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.entries.remove(&normalize_path(path))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileRecord)> {
        self.entries.iter().map(|(path, record)| (path.as_str(), record))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_encrypted(&self) -> bool {
        self.entries.values().any(FileRecord::is_encrypted)
    }

    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Per-path checksum and encoded size of every record.
    pub fn entry_digests(&self) -> Result<BTreeMap<&str, EntryDigest>> {
        self.entries
            .iter()
            .map(|(path, record)| {
                let encoded = serde_json::to_vec(record)?;
                Ok((
                    path.as_str(),
                    EntryDigest {
                        checksum: sha256_hex(&encoded),
                        size: encoded.len() as u64,
                    },
                ))
            })
            .collect()
    }

    pub fn summary(&self) -> String {
        let encrypted = self.entries.values().filter(|r| r.is_encrypted()).count();
        format!("{} entries ({} encrypted)", self.len(), encrypted)
    }
}

impl FromIterator<(String, FileRecord)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, FileRecord)>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for (path, record) in iter {
            snapshot.insert(path, record);
        }
        snapshot
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDigest {
    pub checksum: String,
    pub size: u64,
}

/// Forward slashes, no empty or `.` segments, no leading or trailing slash.
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Clone)]
pub struct EncryptionOptions {
    pub enabled: bool,
    pub key: String,
    pub algorithm: CipherAlgorithm,
}

impl EncryptionOptions {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            enabled: true,
            key: key.into(),
            algorithm: CipherAlgorithm::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: CipherAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

impl fmt::Debug for EncryptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionOptions")
            .field("enabled", &self.enabled)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    pub exclude_patterns: Vec<String>,
    pub max_file_size: Option<u64>,
    pub encryption: Option<EncryptionOptions>,
    /// Upper bound on files read at once during one snapshot.
    pub concurrency: usize,
    pub follow_links: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            max_file_size: None,
            encryption: None,
            concurrency: 16,
            follow_links: false,
        }
    }
}

impl SnapshotOptions {
    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn with_encryption(mut self, encryption: EncryptionOptions) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Builds [`Snapshot`]s from a directory or an in-memory key/value map.
#[derive(Debug)]
pub struct Snapshotter {
    options: SnapshotOptions,
    patterns: Arc<PatternFilter>,
    envelope: Option<CipherEnvelope>,
}

impl Snapshotter {
    pub fn new(options: SnapshotOptions) -> Result<Self> {
        let patterns = Arc::new(PatternFilter::new(&options.exclude_patterns)?);
        let envelope = match &options.encryption {
            Some(encryption) if encryption.enabled => {
                if encryption.key.is_empty() {
                    return Err(Error::Encryption(
                        "Encryption enabled without a key".to_string(),
                    ));
                }
                Some(CipherEnvelope::new(&encryption.key, encryption.algorithm))
            }
            _ => None,
        };

        Ok(Self {
            options,
            patterns,
            envelope,
        })
    }

    pub fn options(&self) -> &SnapshotOptions {
        &self.options
    }

    fn within_size_limit(&self, size: u64) -> bool {
        self.options.max_file_size.is_none_or(|max| size <= max)
    }

    pub async fn snapshot<P: AsRef<Path>>(&self, source: P) -> Result<Snapshot> {
        let source = source.as_ref().to_path_buf();
        let metadata = match fs::metadata(&source).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SourceNotFound {
                    path: source.display().to_string(),
                });
            }
            Err(e) => return Err(Error::file("stat", &source)(e)),
        };

        let candidates = if metadata.is_dir() {
            self.enumerate(source.clone()).await?
        } else {
            self.single_file(&source, metadata.len())
        };

        let records: Vec<(String, FileRecord)> = stream::iter(candidates)
            .map(|entry| self.read_entry(entry))
            .buffer_unordered(self.options.concurrency.max(1))
            .try_collect()
            .await?;

        let snapshot: Snapshot = records.into_iter().collect();
        info!(
            source = %source.display(),
            entries = snapshot.len(),
            encrypted = self.envelope.is_some(),
            "Snapshot created"
        );
        Ok(snapshot)
    }

    /// Snapshots a key/value namespace (node id → bytes) without touching the filesystem.
    pub fn snapshot_map<I, K, V>(&self, entries: I) -> Result<Snapshot>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let mut snapshot = Snapshot::new();
        for (key, value) in entries {
            let path = normalize_path(key.as_ref());
            let bytes = value.as_ref();
            if path.is_empty() || self.patterns.is_excluded(&path, false) {
                debug!(key = %path, "Excluded");
                continue;
            }
            if !self.within_size_limit(bytes.len() as u64) {
                debug!(key = %path, size = bytes.len(), "Over size limit, skipped");
                continue;
            }
            let record = self.build_record(&path, bytes.to_vec())?;
            snapshot.insert(path, record);
        }
        Ok(snapshot)
    }

    async fn enumerate(&self, root: PathBuf) -> Result<Vec<WalkEntry>> {
        let patterns = Arc::clone(&self.patterns);
        let max_file_size = self.options.max_file_size;
        let walker = Walker::new(root)
            .follow_links(self.options.follow_links)
            .filter(move |entry| !patterns.is_excluded(&entry.relative_path, entry.is_dir))
            .filter(move |entry| entry.is_dir || max_file_size.is_none_or(|max| entry.size <= max));

        tokio::task::spawn_blocking(move || walker.walk())
            .await
            .map_err(|e| Error::Other(format!("Directory walk panicked: {}", e)))?
    }

    fn single_file(&self, path: &Path, size: u64) -> Vec<WalkEntry> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            warn!(path = %path.display(), "Skipping source with a non UTF-8 name");
            return Vec::new();
        };
        if name.is_empty() || self.patterns.is_excluded(&name, false) || !self.within_size_limit(size)
        {
            return Vec::new();
        }
        vec![WalkEntry {
            path: path.to_path_buf(),
            relative_path: name,
            size,
            is_dir: false,
        }]
    }

    async fn read_entry(&self, entry: WalkEntry) -> Result<(String, FileRecord)> {
        let bytes = fs::read(&entry.path)
            .await
            .map_err(Error::file("read", &entry.path))?;
        let record = self.build_record(&entry.relative_path, bytes)?;
        debug!(path = %entry.relative_path, kind = %record.kind(), "Captured");
        Ok((entry.relative_path, record))
    }

    fn build_record(&self, path: &str, bytes: Vec<u8>) -> Result<FileRecord> {
        let mime_type = classify::mime_type_for(path).to_string();

        if let Some(envelope) = &self.envelope {
            let sealed = envelope.encrypt(&bytes)?;
            return Ok(FileRecord::Encrypted {
                ciphertext: sealed.ciphertext_base64(),
                iv: sealed.iv_base64(),
                mime_type,
            });
        }

        Ok(match classify::classify(path) {
            ContentClass::Binary => FileRecord::binary(&bytes, mime_type),
            ContentClass::Text => match String::from_utf8(bytes) {
                Ok(text) => FileRecord::text(text, mime_type),
                // Not valid UTF-8: keep it lossless as base64.
                Err(e) => FileRecord::binary(e.as_bytes(), mime_type),
            },
        })
    }
}
