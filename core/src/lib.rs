pub mod classify;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod naming;
pub mod orchestrator;
pub mod snapshot;
pub mod storage;
pub mod types;
pub mod version;
pub mod walker;

pub use config::EngineConfig;
pub use crypto::CipherAlgorithm;
pub use error::{Error, Result};
pub use orchestrator::{BackupOrchestrator, CreateBackupOptions, RestoreOptions, RotatedBackup};
pub use snapshot::{EncryptionOptions, Snapshot, SnapshotOptions, Snapshotter};
pub use storage::{Fetcher, StorageBackend, Unpinner, UploadOptions, UploadReceipt, Uploader};
pub use types::*;
pub use version::VersionManager;
