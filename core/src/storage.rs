//! Storage backend capabilities.
//!
//! A backend implements only the capabilities it actually has. The
//! orchestrator asks for exactly the ones each operation needs, so a read-only
//! backend cannot be handed to `create_backup` at all.

use crate::Result;
use crate::naming::MetadataValue;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub name: Option<String>,
    /// Flat key/value metadata for backends that index it.
    pub metadata: BTreeMap<String, MetadataValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    /// Content id assigned by the backend.
    pub id: String,
    pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    /// Stores a serialized `{data, metadata}` JSON payload.
    async fn upload(&self, payload: Bytes, options: &UploadOptions) -> Result<UploadReceipt>;
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Bytes>;
}

#[async_trait]
pub trait Unpinner: Send + Sync {
    /// Removes the artifact. `Ok(false)` when nothing was stored under `id`.
    async fn unpin(&self, id: &str) -> Result<bool>;
}

/// Backends with every capability.
pub trait StorageBackend: Uploader + Fetcher + Unpinner {}

impl<T: Uploader + Fetcher + Unpinner> StorageBackend for T {}

#[async_trait]
impl<T: Uploader + ?Sized> Uploader for Arc<T> {
    async fn upload(&self, payload: Bytes, options: &UploadOptions) -> Result<UploadReceipt> {
        (**self).upload(payload, options).await
    }
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, id: &str) -> Result<Bytes> {
        (**self).fetch(id).await
    }
}

#[async_trait]
impl<T: Unpinner + ?Sized> Unpinner for Arc<T> {
    async fn unpin(&self, id: &str) -> Result<bool> {
        (**self).unpin(id).await
    }
}
