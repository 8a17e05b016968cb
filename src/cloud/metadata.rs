//! EC2 instance metadata service client
//!
//! Reads the instance identity document, which carries this instance's id,
//! region and private IP. An IMDSv2 session token is requested first; when
//! the service does not hand one out the request falls back to IMDSv1.

use super::CloudError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const TOKEN_PATH: &str = "/latest/api/token";
const IDENTITY_DOCUMENT_PATH: &str = "/latest/dynamic/instance-identity/document";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECONDS: &str = "60";

/// The subset of the identity document this crate needs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub region: String,
    pub private_ip: String,
}

/// Trait for reading this instance's identity
///
/// Production code uses `ImdsClient`; tests use `MockMetadata`.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    async fn identity(&self) -> Result<InstanceIdentity, CloudError>;
}

/// Client for the link-local instance metadata service
pub struct ImdsClient {
    client: reqwest::Client,
    base_url: String,
}

impl ImdsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build metadata HTTP client, using default");
                reqwest::Client::new()
            }
        };
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// IMDSv2 session token, if the service issues one
    async fn session_token(&self) -> Option<String> {
        let response = self
            .client
            .put(format!("{}{}", self.base_url, TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECONDS)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "No IMDSv2 token issued, using IMDSv1");
            return None;
        }
        response.text().await.ok().filter(|t| !t.is_empty())
    }
}

#[async_trait]
impl InstanceMetadata for ImdsClient {
    async fn identity(&self) -> Result<InstanceIdentity, CloudError> {
        let url = format!("{}{}", self.base_url, IDENTITY_DOCUMENT_PATH);

        let mut request = self.client.get(&url);
        if let Some(token) = self.session_token().await {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudError::MetadataUnreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::MetadataUnreachable(format!(
                "GET {}: HTTP {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let identity: InstanceIdentity = response
            .json()
            .await
            .map_err(|e| CloudError::InvalidMetadata(e.to_string()))?;

        if identity.instance_id.is_empty()
            || identity.region.is_empty()
            || identity.private_ip.is_empty()
        {
            return Err(CloudError::InvalidMetadata(
                "identity document has empty fields".to_string(),
            ));
        }

        Ok(identity)
    }
}

/// Mock metadata service returning a fixed identity (or failure)
#[cfg(test)]
pub struct MockMetadata {
    identity: std::sync::Mutex<Option<InstanceIdentity>>,
    calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockMetadata {
    pub fn new(identity: InstanceIdentity) -> Self {
        Self {
            identity: std::sync::Mutex::new(Some(identity)),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            identity: std::sync::Mutex::new(None),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[async_trait]
impl InstanceMetadata for MockMetadata {
    async fn identity(&self) -> Result<InstanceIdentity, CloudError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.identity
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CloudError::MetadataUnreachable("HTTP 404".to_string()))
    }
}
