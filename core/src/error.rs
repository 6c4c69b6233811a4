use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Entry {path} is encrypted but no encryption key was supplied")]
    MissingEncryptionKey { path: String },

    #[error("Invalid backup format: {0}")]
    InvalidBackupFormat(String),

    #[error("Storage integrity error: {0}")]
    StorageIntegrity(String),

    #[error("Operation not supported by storage backend: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Snapshot source not found: {path}")]
    SourceNotFound { path: String },

    #[error("Failed to {operation} {path}: {source}")]
    File {
        path: String,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn file(
        operation: &'static str,
        path: impl AsRef<std::path::Path>,
    ) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.as_ref().display().to_string();
        move |source| Self::File {
            path,
            operation,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
