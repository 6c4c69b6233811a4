use crate::config::EngineConfig;
use crate::crypto::{CipherAlgorithm, CipherEnvelope, Envelope};
use crate::naming::{generate_backup_name, serialize_metadata};
use crate::snapshot::{Snapshot, SnapshotOptions, Snapshotter};
use crate::storage::{Fetcher, Unpinner, UploadOptions, Uploader};
use crate::version::{VersionManager, now_millis};
use crate::{
    BackupArtifact, BackupKind, BackupMetadata, BackupResult, DetailedComparison, Error,
    FileRecord, Result, VersionComparison, VersionInfo,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::{Component, Path};
use std::sync::Mutex;
use tokio::fs;
use tracing::{debug, info, warn};

/// Options for [`BackupOrchestrator::create_backup`].
#[derive(Debug, Clone, Default)]
pub struct CreateBackupOptions {
    /// Explicit name; a deterministic one is generated when absent.
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub kind: BackupKind,
    /// Extra fields merged into the stored metadata object.
    pub custom: serde_json::Map<String, Value>,
}

impl CreateBackupOptions {
    pub fn new(kind: BackupKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

/// Options for [`BackupOrchestrator::restore_backup`].
#[derive(Clone, Default)]
pub struct RestoreOptions {
    /// Passphrase for encrypted entries.
    pub encryption_key: Option<String>,
    pub algorithm: CipherAlgorithm,
    /// Empty the target directory before writing (tree-replace restore).
    pub clean: bool,
}

impl RestoreOptions {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn with_algorithm(mut self, algorithm: CipherAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }
}

impl fmt::Debug for RestoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreOptions")
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("algorithm", &self.algorithm)
            .field("clean", &self.clean)
            .finish()
    }
}

/// Outcome of [`BackupOrchestrator::rotate_backup`].
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedBackup {
    pub result: BackupResult,
    /// Whether the previous artifact was actually removed.
    pub previous_removed: bool,
}

#[derive(Serialize)]
struct ArtifactRef<'a> {
    data: &'a Snapshot,
    metadata: &'a BackupMetadata,
}

/// A fetched artifact whose `data` and `metadata` fields are known to exist.
struct RawArtifact {
    data: Value,
    metadata: Value,
}

/// Creates, retrieves, compares, restores and deletes backups against a
/// storage backend.
///
/// The backend type decides which operations are available: creating a
/// backup needs [`Uploader`], reading one needs [`Fetcher`], deleting one
/// needs [`Unpinner`].
///
/// # Examples
///
/// ```no_run
/// use pinsnap_core::{BackupOrchestrator, CreateBackupOptions, SnapshotOptions, Snapshotter};
/// # use pinsnap_core::storage::{Fetcher, Uploader};
///
/// # async fn run<B: Uploader + Fetcher>(backend: B) -> pinsnap_core::Result<()> {
/// let orchestrator = BackupOrchestrator::new(backend);
/// let snapshot = Snapshotter::new(SnapshotOptions::default())?
///     .snapshot("./graph-data")
///     .await?;
///
/// let backup = orchestrator
///     .create_backup(&snapshot, &CreateBackupOptions::default())
///     .await?;
/// let diff = orchestrator
///     .compare_detailed(&backup.hash, "./graph-data", &SnapshotOptions::default())
///     .await?;
/// assert!(diff.is_equal);
/// # Ok(())
/// # }
/// ```
pub struct BackupOrchestrator<B> {
    backend: B,
    versions: VersionManager,
    name_prefix: String,
    last_backup: Mutex<Option<String>>,
}

impl<B> BackupOrchestrator<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            versions: VersionManager::new(),
            name_prefix: "backup".to_string(),
            last_backup: Mutex::new(None),
        }
    }

    pub fn from_config(backend: B, config: &EngineConfig) -> Self {
        Self::new(backend).with_name_prefix(config.name_prefix.clone())
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn version_manager(&self) -> &VersionManager {
        &self.versions
    }

    /// Content id of the last backup created through this orchestrator.
    pub fn last_backup_id(&self) -> Option<String> {
        self.last_backup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record_last_backup(&self, id: &str) {
        *self
            .last_backup
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(id.to_string());
    }
}

impl<B: Uploader> BackupOrchestrator<B> {
    /// Serializes `snapshot`, versions it, and uploads the `{data, metadata}`
    /// envelope.
    ///
    /// # Errors
    ///
    /// * Backend errors are returned with the backup name attached.
    /// * `Error::StorageIntegrity` - the backend accepted the upload but
    ///   returned an empty id
    pub async fn create_backup(
        &self,
        snapshot: &Snapshot,
        options: &CreateBackupOptions,
    ) -> Result<BackupResult> {
        let data = snapshot.to_canonical_bytes()?;
        let version_info = self.versions.create_version_info(&data);

        let mut metadata = BackupMetadata {
            timestamp: now_millis(),
            kind: options.kind,
            version_info: version_info.clone(),
            name: None,
            description: options.description.clone(),
            tags: (!options.tags.is_empty()).then(|| options.tags.clone()),
            custom: options.custom.clone(),
        };
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| generate_backup_name(&self.name_prefix, &metadata));
        metadata.name = Some(name.clone());

        let payload = serde_json::to_vec(&ArtifactRef {
            data: snapshot,
            metadata: &metadata,
        })?;
        let upload_options = UploadOptions {
            name: Some(name.clone()),
            metadata: serialize_metadata(&metadata)?,
        };

        info!(
            name = %name,
            entries = snapshot.len(),
            size = payload.len(),
            "Uploading backup"
        );
        let receipt = self
            .backend
            .upload(Bytes::from(payload), &upload_options)
            .await
            .map_err(|e| match e {
                Error::Backend(msg) => Error::Backend(format!("Upload of {} failed: {}", name, msg)),
                other => other,
            })?;

        if receipt.id.trim().is_empty() {
            return Err(Error::StorageIntegrity(format!(
                "Backend accepted {} but returned no content id",
                name
            )));
        }

        self.record_last_backup(&receipt.id);
        info!(id = %receipt.id, checksum = %version_info.hash, "Backup created");

        Ok(BackupResult {
            hash: receipt.id,
            version_info,
            name,
        })
    }
}

impl<B: Uploader + Unpinner> BackupOrchestrator<B> {
    /// Uploads a new backup, then unpins `previous` if given. The new
    /// artifact is stored before the old one is released.
    pub async fn rotate_backup(
        &self,
        snapshot: &Snapshot,
        options: &CreateBackupOptions,
        previous: Option<&str>,
    ) -> Result<RotatedBackup> {
        let result = self.create_backup(snapshot, options).await?;

        let previous_removed = match previous {
            Some(id) if id != result.hash => self.delete(id).await?,
            Some(_) => {
                debug!(id = %result.hash, "Previous backup has identical content id, kept");
                false
            }
            None => false,
        };

        Ok(RotatedBackup {
            result,
            previous_removed,
        })
    }
}

impl<B: Fetcher> BackupOrchestrator<B> {
    async fn fetch_raw(&self, id: &str) -> Result<RawArtifact> {
        let bytes = self.backend.fetch(id).await?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
            Error::InvalidBackupFormat(format!("Backup {} is not valid JSON: {}", id, e))
        })?;

        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidBackupFormat(format!(
                "Backup {} is not a JSON object",
                id
            )));
        };

        let mut take = |field: &str| {
            fields
                .remove(field)
                .filter(|value| !value.is_null())
                .ok_or_else(|| {
                    Error::InvalidBackupFormat(format!("Backup {} has no {} field", id, field))
                })
        };
        let data = take("data")?;
        let metadata = take("metadata")?;
        Ok(RawArtifact { data, metadata })
    }

    /// Fetches and validates a stored backup.
    ///
    /// # Errors
    ///
    /// `Error::InvalidBackupFormat` when the artifact lacks `data` or
    /// `metadata`, or either does not have the expected shape.
    pub async fn get_backup(&self, id: &str) -> Result<BackupArtifact> {
        let raw = self.fetch_raw(id).await?;
        let data: Snapshot = serde_json::from_value(raw.data).map_err(|e| {
            Error::InvalidBackupFormat(format!("Backup {} has malformed data: {}", id, e))
        })?;
        let metadata = parse_metadata(id, raw.metadata)?;
        debug!(id, entries = data.len(), "Backup fetched");
        Ok(BackupArtifact { data, metadata })
    }

    /// Writes every entry of backup `id` below `target`.
    ///
    /// Every entry is validated and decoded before the first write, so a bad
    /// path, a missing key or corrupt content leaves the target untouched. The
    /// target is created when missing. Existing files are overwritten and
    /// unrelated files are left alone unless [`RestoreOptions::clean`] is set.
    /// A failing write aborts the restore; files already written stay.
    ///
    /// # Errors
    ///
    /// * `Error::MissingEncryptionKey` - an entry is encrypted and no key was given
    /// * `Error::Decryption` - wrong key or algorithm, or corrupted ciphertext
    /// * `Error::File` - creating a directory or writing a file failed
    /// * `Error::InvalidBackupFormat` - an entry path escapes the target, or
    ///   binary content is not valid base64
    pub async fn restore_backup<P: AsRef<Path>>(
        &self,
        id: &str,
        target: P,
        options: &RestoreOptions,
    ) -> Result<bool> {
        let target = target.as_ref();
        let snapshot = self.get_backup(id).await?.data;

        for path in snapshot.paths() {
            validate_entry_path(path)?;
        }

        let envelope = options
            .encryption_key
            .as_deref()
            .map(|key| CipherEnvelope::new(key, options.algorithm));
        let decoded = snapshot
            .iter()
            .map(|(path, record)| Ok::<_, Error>((path, decode_record(path, record, envelope.as_ref())?)))
            .collect::<Result<Vec<_>>>()?;

        fs::create_dir_all(target)
            .await
            .map_err(Error::file("create directory", target))?;
        if options.clean {
            clear_directory(target).await?;
        }

        info!(id, target = %target.display(), entries = decoded.len(), "Restoring backup");
        for (path, bytes) in &decoded {
            let destination = target.join(path);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(Error::file("create directory", parent))?;
            }

            fs::write(&destination, bytes)
                .await
                .map_err(Error::file("write", &destination))?;
            debug!(path, size = bytes.len(), "Restored");
        }

        info!(id, entries = decoded.len(), "Restore completed");
        Ok(true)
    }

    /// Re-snapshots `source` and compares it with the stored version as a whole.
    pub async fn compare<P: AsRef<Path>>(
        &self,
        id: &str,
        source: P,
        options: &SnapshotOptions,
    ) -> Result<VersionComparison> {
        let local = Snapshotter::new(options.clone())?
            .snapshot(source)
            .await?
            .to_canonical_bytes()?;
        let artifact = self.get_backup(id).await?;
        Ok(self
            .versions
            .compare_versions(&local, &artifact.metadata.version_info))
    }

    /// Re-snapshots `source` and diffs it entry by entry against backup `id`.
    ///
    /// Stored data that does not parse as a snapshot is compared as empty;
    /// see [`DetailedComparison::remote_unreadable`].
    pub async fn compare_detailed<P: AsRef<Path>>(
        &self,
        id: &str,
        source: P,
        options: &SnapshotOptions,
    ) -> Result<DetailedComparison> {
        let local = Snapshotter::new(options.clone())?
            .snapshot(source)
            .await?
            .to_canonical_bytes()?;

        let raw = self.fetch_raw(id).await?;
        let remote = serde_json::to_vec(&raw.data)?;
        let remote_version = parse_metadata(id, raw.metadata)?.version_info;
        self.versions
            .compare_detailed_with_version(&local, &remote, remote_version)
    }

    /// Stored version of backup `id`, without the data.
    pub async fn version_of(&self, id: &str) -> Result<VersionInfo> {
        let raw = self.fetch_raw(id).await?;
        Ok(parse_metadata(id, raw.metadata)?.version_info)
    }
}

impl<B: Unpinner> BackupOrchestrator<B> {
    /// Unpins backup `id`. Returns `false` when it was already gone.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.backend.unpin(id).await?;
        if removed {
            info!(id, "Backup deleted");
        } else {
            warn!(id, "Backup to delete was not present");
        }
        Ok(removed)
    }
}

fn parse_metadata(id: &str, metadata: Value) -> Result<BackupMetadata> {
    serde_json::from_value(metadata).map_err(|e| {
        Error::InvalidBackupFormat(format!("Backup {} has malformed metadata: {}", id, e))
    })
}

/// Raw bytes of one entry. Errors name the entry.
fn decode_record(
    path: &str,
    record: &FileRecord,
    envelope: Option<&CipherEnvelope>,
) -> Result<Vec<u8>> {
    let FileRecord::Encrypted { ciphertext, iv, .. } = record else {
        return record.plain_bytes().map_err(|e| match e {
            Error::InvalidBackupFormat(msg) => {
                Error::InvalidBackupFormat(format!("{}: {}", path, msg))
            }
            other => other,
        });
    };

    let envelope = envelope.ok_or_else(|| Error::MissingEncryptionKey {
        path: path.to_string(),
    })?;
    Envelope::from_base64(ciphertext, iv)
        .and_then(|sealed| envelope.open(&sealed))
        .map_err(|e| match e {
            Error::Decryption(msg) => Error::Decryption(format!("{}: {}", path, msg)),
            other => other,
        })
}

fn validate_entry_path(path: &str) -> Result<()> {
    let candidate = Path::new(path);
    let safe = !path.is_empty()
        && candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(Error::InvalidBackupFormat(format!(
            "Entry path {:?} escapes the restore target",
            path
        )))
    }
}

async fn clear_directory(dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(Error::file("read directory", dir))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(Error::file("read directory", dir))?
    {
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(Error::file("stat", &path))?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path)
                .await
                .map_err(Error::file("remove", &path))?;
        } else {
            fs::remove_file(&path)
                .await
                .map_err(Error::file("remove", &path))?;
        }
    }
    debug!(dir = %dir.display(), "Cleared restore target");
    Ok(())
}
