//! Client for the instance metadata service.

use async_trait::async_trait;
use reqwest::Client;

use crate::errors::ExecutorError;
use crate::executor::send_request;

/// Base URL of the metadata service reachable from a cloud instance.
pub const METADATA_SERVER: &str = "http://metadata/computeMetadata/v1";

/// Email of the instance's default service account.
pub const IDENTITY_PATH: &str = "/instance/service-accounts/default/email";

/// OAuth2 scopes the instance is limited to, one per line.
pub const SCOPES_PATH: &str = "/instance/service-accounts/default/scopes";

/// Access token of the instance's default service account (JSON).
pub const TOKEN_PATH: &str = "/instance/service-accounts/default/token";

pub const PROJECT_ID_PATH: &str = "/project/project-id";

#[async_trait]
pub trait MetadataReader: Send + Sync {
    /// Whether the metadata service answers at all. Never retried; any
    /// failure means "no".
    async fn has_metadata(&self) -> bool;

    /// Reads a path such as `/instance/...` or `/project/...` as plain text.
    async fn read_metadata(&self, path: &str) -> Result<String, ExecutorError>;
}

/// Reads metadata with plain HTTP GETs.
pub struct HttpMetadataReader {
    base_url: String,
    http: Client,
}

impl HttpMetadataReader {
    pub fn new(base_url: impl Into<String>, http: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for HttpMetadataReader {
    fn default() -> Self {
        Self::new(METADATA_SERVER, Client::new())
    }
}

#[async_trait]
impl MetadataReader for HttpMetadataReader {
    async fn has_metadata(&self) -> bool {
        match self.read_metadata("").await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "metadata service not reachable");
                false
            }
        }
    }

    async fn read_metadata(&self, path: &str) -> Result<String, ExecutorError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .http
            .get(&url)
            // the v1 endpoint answers nothing without this header
            .header("Metadata-Flavor", "Google");

        send_request(request).await.map_err(|e| match e {
            ExecutorError::Status(s) if s.status == 401 || s.status == 403 => {
                ExecutorError::Forbidden(s)
            }
            ExecutorError::Status(s) if s.status == 404 => ExecutorError::NotFound(s),
            other => other,
        })
    }
}

/// Splits the newline-separated scope listing returned by [`SCOPES_PATH`].
pub fn parse_scopes(listing: &str) -> Vec<String> {
    listing
        .split('\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
