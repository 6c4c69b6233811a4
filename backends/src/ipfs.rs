//! IPFS storage through a public gateway or the Pinata pinning API.
//!
//! A gateway provider can only fetch. Pinata can upload, fetch and unpin.
//!
//! ```no_run
//! use pinsnap_backends::{IpfsBackend, IpfsProvider};
//! use pinsnap_core::BackupOrchestrator;
//!
//! let provider = IpfsProvider::Pinata {
//!     api_key: "key".to_string(),
//!     secret_key: "secret".to_string(),
//!     gateway_url: None,
//! };
//! let orchestrator = BackupOrchestrator::new(IpfsBackend::new(provider));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use pinsnap_core::naming::MetadataValue;
use pinsnap_core::{Error, Fetcher, Result, Unpinner, UploadOptions, UploadReceipt, Uploader};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{debug, error, info};

pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.pinata.cloud/ipfs/";
pub const PINATA_API_URL: &str = "https://api.pinata.cloud";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpfsProvider {
    /// Read-only access through a gateway.
    Gateway { url: String },
    Pinata {
        api_key: String,
        secret_key: String,
        gateway_url: Option<String>,
    },
}

impl IpfsProvider {
    /// Pinata when `PINATA_API_KEY` and `PINATA_SECRET_KEY` are both set,
    /// otherwise a gateway from `IPFS_GATEWAY_URL` or the public default.
    pub fn from_env() -> Self {
        use std::env;

        if let (Ok(api_key), Ok(secret_key)) =
            (env::var("PINATA_API_KEY"), env::var("PINATA_SECRET_KEY"))
        {
            return Self::Pinata {
                api_key,
                secret_key,
                gateway_url: env::var("PINATA_GATEWAY_URL").ok(),
            };
        }

        Self::Gateway {
            url: env::var("IPFS_GATEWAY_URL").unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string()),
        }
    }

    pub fn gateway_url(&self) -> &str {
        match self {
            Self::Gateway { url } => url,
            Self::Pinata { gateway_url, .. } => {
                gateway_url.as_deref().unwrap_or(DEFAULT_GATEWAY_URL)
            }
        }
    }

    pub fn content_url(&self, cid: &str) -> String {
        let gateway = self.gateway_url();
        if gateway.ends_with('/') {
            format!("{}{}", gateway, cid)
        } else {
            format!("{}/{}", gateway, cid)
        }
    }

    fn credentials(&self, operation: &str) -> Result<(&str, &str)> {
        match self {
            Self::Pinata {
                api_key,
                secret_key,
                ..
            } => Ok((api_key, secret_key)),
            Self::Gateway { .. } => Err(Error::UnsupportedOperation {
                operation: format!(
                    "{} (gateway-only provider; set PINATA_API_KEY and PINATA_SECRET_KEY)",
                    operation
                ),
            }),
        }
    }
}

pub struct IpfsBackend {
    provider: IpfsProvider,
    client: reqwest::Client,
    api_url: String,
}

impl IpfsBackend {
    pub fn new(provider: IpfsProvider) -> Self {
        Self {
            provider,
            client: reqwest::Client::new(),
            api_url: PINATA_API_URL.to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(IpfsProvider::from_env())
    }

    /// Points the pinning calls at another Pinata-compatible API.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn provider(&self) -> &IpfsProvider {
        &self.provider
    }
}

/// `pinJSONToIPFS` request body.
fn pin_request(
    content: Value,
    name: Option<&str>,
    keyvalues: &BTreeMap<String, MetadataValue>,
) -> Value {
    let mut metadata = json!({ "keyvalues": keyvalues });
    if let Some(name) = name {
        metadata["name"] = Value::String(name.to_string());
    }
    json!({
        "pinataContent": content,
        "pinataMetadata": metadata,
        "pinataOptions": { "cidVersion": 1 },
    })
}

/// Turns a `pinJSONToIPFS` reply into a receipt carrying the CID.
pub(crate) fn parse_pin_response(status: StatusCode, body: &str) -> Result<UploadReceipt> {
    if !status.is_success() {
        return Err(Error::Backend(format!(
            "Pinata upload failed with status {}: {}",
            status,
            body.trim()
        )));
    }

    let json: Value = serde_json::from_str(body)
        .map_err(|e| Error::Backend(format!("Failed to parse Pinata response: {}", e)))?;
    let cid = json
        .get("IpfsHash")
        .and_then(Value::as_str)
        .filter(|cid| !cid.is_empty())
        .ok_or_else(|| Error::Backend("Pinata response missing IpfsHash field".to_string()))?
        .to_string();

    Ok(UploadReceipt {
        id: cid,
        metadata: Some(json),
    })
}

/// `Ok(false)` when Pinata does not know the pin.
pub(crate) fn unpin_outcome(id: &str, status: StatusCode, body: &str) -> Result<bool> {
    if status == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    if !status.is_success() {
        return Err(Error::Backend(format!(
            "Pinata unpin of {} failed with status {}: {}",
            id,
            status,
            body.trim()
        )));
    }
    Ok(true)
}

#[async_trait]
impl Uploader for IpfsBackend {
    async fn upload(&self, payload: Bytes, options: &UploadOptions) -> Result<UploadReceipt> {
        let (api_key, secret_key) = self.provider.credentials("upload")?;
        let content: Value = serde_json::from_slice(&payload)?;
        let body = pin_request(content, options.name.as_deref(), &options.metadata);
        let name = options.name.as_deref().unwrap_or("unnamed");

        info!(name, size = payload.len(), "Pinning backup to IPFS");
        let response = self
            .client
            .post(format!("{}/pinning/pinJSONToIPFS", self.api_url))
            .header("pinata_api_key", api_key)
            .header("pinata_secret_api_key", secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to reach Pinata: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read Pinata response: {}", e)))?;
        let receipt = parse_pin_response(status, &text)
            .inspect_err(|e| error!(name, status = %status, error = %e, "Pinata upload rejected"))?;

        info!(name, cid = %receipt.id, "Backup pinned");
        Ok(receipt)
    }
}

#[async_trait]
impl Fetcher for IpfsBackend {
    async fn fetch(&self, id: &str) -> Result<Bytes> {
        let url = self.provider.content_url(id);
        debug!(url = %url, "Fetching from IPFS");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to download {} from IPFS: {}", id, e)))?;
        if !response.status().is_success() {
            return Err(Error::Backend(format!(
                "Failed to download {} from IPFS: status {}",
                id,
                response.status()
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::Backend(format!("Failed to read IPFS response: {}", e)))?;
        debug!(cid = id, size = data.len(), "Fetched from IPFS");
        Ok(data)
    }
}

#[async_trait]
impl Unpinner for IpfsBackend {
    async fn unpin(&self, id: &str) -> Result<bool> {
        let (api_key, secret_key) = self.provider.credentials("unpin")?;
        let response = self
            .client
            .delete(format!("{}/pinning/unpin/{}", self.api_url, id))
            .header("pinata_api_key", api_key)
            .header("pinata_secret_api_key", secret_key)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to reach Pinata: {}", e)))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let removed = unpin_outcome(id, status, &text)?;
        if removed {
            info!(cid = id, "Backup unpinned");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> IpfsProvider {
        IpfsProvider::Gateway {
            url: "https://example.com/ipfs".to_string(),
        }
    }

    #[test]
    fn test_provider_gateway_url() {
        assert_eq!(gateway().content_url("bafy"), "https://example.com/ipfs/bafy");

        let pinata = IpfsProvider::Pinata {
            api_key: "key".to_string(),
            secret_key: "secret".to_string(),
            gateway_url: None,
        };
        assert_eq!(pinata.gateway_url(), DEFAULT_GATEWAY_URL);
        assert_eq!(
            pinata.content_url("bafy"),
            "https://gateway.pinata.cloud/ipfs/bafy"
        );
    }

    #[test]
    fn test_pin_request_shape() {
        let mut keyvalues = BTreeMap::new();
        keyvalues.insert("type".to_string(), MetadataValue::from("full"));
        let body = pin_request(json!({"data": {}}), Some("backup-1"), &keyvalues);

        assert_eq!(body["pinataContent"], json!({"data": {}}));
        assert_eq!(body["pinataMetadata"]["name"], "backup-1");
        assert_eq!(body["pinataMetadata"]["keyvalues"]["type"], "full");
        assert_eq!(body["pinataOptions"]["cidVersion"], 1);

        let unnamed = pin_request(json!({}), None, &BTreeMap::new());
        assert!(unnamed["pinataMetadata"].get("name").is_none());
    }

    #[tokio::test]
    async fn test_gateway_provider_cannot_write() {
        let backend = IpfsBackend::new(gateway());
        let upload = backend
            .upload(Bytes::from_static(b"{}"), &UploadOptions::default())
            .await;
        assert!(matches!(upload, Err(Error::UnsupportedOperation { .. })));
        assert!(matches!(
            backend.unpin("bafy").await,
            Err(Error::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_pin_response_success() {
        let receipt = parse_pin_response(
            StatusCode::OK,
            r#"{"IpfsHash":"bafkreid","PinSize":42,"Timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(receipt.id, "bafkreid");
        assert_eq!(receipt.metadata.unwrap()["PinSize"], 42);
    }

    #[test]
    fn test_pin_response_rejected_keeps_status_and_body() {
        let err = parse_pin_response(
            StatusCode::UNAUTHORIZED,
            "{\"error\":\"Invalid API key\"}\n",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Backend(_)));
        assert!(message.contains("401"), "{}", message);
        assert!(message.contains("Invalid API key"), "{}", message);
    }

    #[test]
    fn test_pin_response_without_cid() {
        for body in [r#"{"PinSize":42}"#, r#"{"IpfsHash":""}"#, r#"{"IpfsHash":7}"#, "<html>"] {
            let err = parse_pin_response(StatusCode::OK, body).unwrap_err();
            assert!(matches!(err, Error::Backend(_)), "{}", body);
        }
    }

    #[test]
    fn test_unpin_outcomes() {
        assert!(unpin_outcome("bafy", StatusCode::OK, "OK").unwrap());
        assert!(!unpin_outcome("bafy", StatusCode::NOT_FOUND, "").unwrap());

        let err = unpin_outcome("bafy", StatusCode::FORBIDDEN, "not your pin").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("bafy") && message.contains("403"), "{}", message);
        assert!(message.contains("not your pin"), "{}", message);
    }

    #[test]
    fn test_api_url_trimmed() {
        let backend = IpfsBackend::new(gateway()).with_api_url("http://localhost:8080/");
        assert_eq!(backend.api_url, "http://localhost:8080");
    }
}
