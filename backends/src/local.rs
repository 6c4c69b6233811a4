use async_trait::async_trait;
use bytes::Bytes;
use pinsnap_core::{Error, Fetcher, Result, Unpinner, UploadOptions, UploadReceipt, Uploader};
use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tracing::debug;

/// BLAKE3 digest of a stored payload, used as its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentId(blake3::Hash);

impl ContentId {
    pub fn from_data(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    pub fn short_string(&self) -> String {
        self.to_hex().chars().take(8).collect()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        blake3::Hash::from_hex(s)
            .map(Self)
            .map_err(|_| Error::Backend(format!("Invalid content id: {:?}", s)))
    }
}

/// Content-addressed store on the local filesystem.
///
/// Payloads live at `<root>/objects/<blake3-hex>.json`. Uploading the same
/// payload twice yields the same id and writes once.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn object_path(&self, id: &ContentId) -> PathBuf {
        self.objects_dir().join(format!("{}.json", id))
    }

    /// Ids of every stored payload, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let dir = self.objects_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Backend(format!("Failed to list {}: {}", dir.display(), e))),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if stem.parse::<ContentId>().is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Writes through a uniquely named staging file in `dir`, then renames it over
/// `path`. Concurrent writers of the same id each rename a complete copy.
fn persist_object(dir: &Path, path: &Path, payload: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut staging = tempfile::NamedTempFile::new_in(dir)?;
    staging.write_all(payload)?;
    staging.as_file().sync_all()?;
    staging.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Uploader for LocalBackend {
    async fn upload(&self, payload: Bytes, options: &UploadOptions) -> Result<UploadReceipt> {
        let id = ContentId::from_data(&payload);
        let path = self.object_path(&id);

        if fs::try_exists(&path).await? {
            debug!(id = %id.short_string(), "Payload already stored");
        } else {
            let dir = self.objects_dir();
            let staged = payload.clone();
            tokio::task::spawn_blocking(move || persist_object(&dir, &path, &staged))
                .await
                .map_err(|e| Error::Backend(format!("Store task for {} failed: {}", id, e)))?
                .map_err(|e| Error::Backend(format!("Failed to store {}: {}", id, e)))?;
            debug!(id = %id.short_string(), size = payload.len(), "Payload stored");
        }

        Ok(UploadReceipt {
            id: id.to_hex(),
            metadata: Some(serde_json::json!({
                "name": options.name,
                "size": payload.len(),
            })),
        })
    }
}

#[async_trait]
impl Fetcher for LocalBackend {
    async fn fetch(&self, id: &str) -> Result<Bytes> {
        let content_id: ContentId = id.parse()?;
        let data = fs::read(self.object_path(&content_id))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::Backend(format!("Backup {} not found", id)),
                _ => Error::Backend(format!("Failed to read {}: {}", id, e)),
            })?;

        if ContentId::from_data(&data) != content_id {
            return Err(Error::StorageIntegrity(format!(
                "Stored payload does not hash to {}",
                id
            )));
        }
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl Unpinner for LocalBackend {
    async fn unpin(&self, id: &str) -> Result<bool> {
        let content_id: ContentId = id.parse()?;
        match fs::remove_file(self.object_path(&content_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Backend(format!("Failed to delete {}: {}", id, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let options = UploadOptions::default();

        let first = backend.upload(Bytes::from_static(b"{\"a\":1}"), &options).await.unwrap();
        let second = backend.upload(Bytes::from_static(b"{\"a\":1}"), &options).await.unwrap();
        let other = backend.upload(Bytes::from_static(b"{\"a\":2}"), &options).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.id, other.id);
        assert_eq!(first.id, ContentId::from_data(b"{\"a\":1}").to_hex());
        assert_eq!(backend.list().await.unwrap().len(), 2);
        assert_eq!(
            backend.fetch(&first.id).await.unwrap(),
            Bytes::from_static(b"{\"a\":1}")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_identical_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let payload = Bytes::from(vec![b'7'; 256 * 1024]);
        let expected = ContentId::from_data(&payload).to_hex();

        for _ in 0..20 {
            let uploads: Vec<_> = (0..8)
                .map(|_| {
                    let backend = backend.clone();
                    let payload = payload.clone();
                    tokio::spawn(async move {
                        backend.upload(payload, &UploadOptions::default()).await
                    })
                })
                .collect();
            for upload in uploads {
                assert_eq!(upload.await.unwrap().unwrap().id, expected);
            }

            assert_eq!(backend.fetch(&expected).await.unwrap(), payload);
            assert!(backend.unpin(&expected).await.unwrap());
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("objects"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "{:?}", leftovers);
    }

    #[tokio::test]
    async fn test_fetch_missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let missing = ContentId::from_data(b"never stored").to_hex();

        assert!(matches!(backend.fetch(&missing).await, Err(Error::Backend(_))));
        assert!(matches!(backend.fetch("../../etc/passwd").await, Err(Error::Backend(_))));
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_payload_detected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let receipt = backend
            .upload(Bytes::from_static(b"{}"), &UploadOptions::default())
            .await
            .unwrap();

        let id: ContentId = receipt.id.parse().unwrap();
        std::fs::write(backend.object_path(&id), b"{\"x\":1}").unwrap();
        assert!(matches!(
            backend.fetch(&receipt.id).await,
            Err(Error::StorageIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn test_unpin_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let receipt = backend
            .upload(Bytes::from_static(b"[]"), &UploadOptions::default())
            .await
            .unwrap();

        assert!(backend.unpin(&receipt.id).await.unwrap());
        assert!(!backend.unpin(&receipt.id).await.unwrap());
        assert!(backend.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_content_id_parsing() {
        let id = ContentId::from_data(b"hello");
        assert_eq!(id.to_hex().parse::<ContentId>().unwrap(), id);
        assert_eq!(id.short_string().len(), 8);
        assert!("xyz".parse::<ContentId>().is_err());
    }
}
