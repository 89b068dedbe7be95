//! Robot (service-account) credentials.
//!
//! Every credential kind funnels token acquisition through
//! [`RobotCredentials::get_access_token`], which owns the expiry check. Kinds
//! only decide how to build the live [`GoogleCredential`].

pub mod metadata;
pub mod private_key;
pub mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::errors::CredentialError;
use crate::executor::{Backoff, Executor};
use crate::metadata::{HttpMetadataReader, MetadataReader};
use crate::scope::ScopeRequirement;
use crate::token::{AccessToken, GoogleCredential};

pub use metadata::MetadataCredentials;
pub use private_key::PrivateKeyCredentials;
pub use remote::{for_remote, RemoteCredentials};

/// Tokens closer than this to expiry are refreshed before use.
pub const MINIMUM_DURATION_SECONDS: i64 = 180;

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Visibility of a credential in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CredentialsScope {
    #[default]
    Global,
    System,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Metadata,
    PrivateKey,
}

/// Static description of a configurable credential kind.
#[derive(Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub kind: CredentialKind,
    pub display_name: &'static str,
}

pub static METADATA_DESCRIPTOR: Descriptor = Descriptor {
    kind: CredentialKind::Metadata,
    display_name: "Google Service Account from metadata",
};

pub static PRIVATE_KEY_DESCRIPTOR: Descriptor = Descriptor {
    kind: CredentialKind::PrivateKey,
    display_name: "Google Service Account from private key",
};

/// Fields shared by every stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialInfo {
    pub id: String,
    pub project_id: String,
    pub scope: CredentialsScope,
    pub description: String,
}

impl CredentialInfo {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            scope: CredentialsScope::Global,
            description: String::new(),
        }
    }
}

/// The transport, retry policy and endpoints credentials talk through.
#[derive(Clone)]
pub struct CredentialsModule {
    pub http: reqwest::Client,
    pub executor: Executor,
    pub metadata: Arc<dyn MetadataReader>,
    pub token_uri: String,
}

impl CredentialsModule {
    pub fn new(
        http: reqwest::Client,
        executor: Executor,
        metadata: Arc<dyn MetadataReader>,
        token_uri: impl Into<String>,
    ) -> Self {
        Self {
            http,
            executor,
            metadata,
            token_uri: token_uri.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let delay = Duration::from_secs(cfg.retry_delay_secs);
        let backoff = if cfg.exponential_backoff {
            Backoff::Exponential {
                base: delay,
                max: delay * 8,
                jitter: Duration::from_millis(500),
            }
        } else {
            Backoff::Fixed(delay)
        };
        let executor = Executor::new(cfg.max_retry, cfg.compose_retry).with_backoff(backoff);
        let metadata = Arc::new(HttpMetadataReader::new(&cfg.metadata_url, http.clone()));

        Ok(Self::new(http, executor, metadata, &cfg.token_uri))
    }
}

impl std::fmt::Debug for CredentialsModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsModule")
            .field("executor", &self.executor)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RobotCredentials: Send + Sync + std::fmt::Debug {
    fn info(&self) -> &CredentialInfo;

    /// Unique across the store.
    fn id(&self) -> &str {
        &self.info().id
    }

    fn project_id(&self) -> &str {
        &self.info().project_id
    }

    fn scope(&self) -> CredentialsScope {
        self.info().scope
    }

    fn description(&self) -> &str {
        &self.info().description
    }

    /// How this kind is configured. Kinds with nothing to configure return
    /// [`CredentialError::UnsupportedOperation`].
    fn descriptor(&self) -> Result<&'static Descriptor, CredentialError>;

    /// The robot's identity, usually its service account email.
    async fn username(&self) -> Result<String, CredentialError>;

    /// Builds a live credential able to produce tokens for `requirement`.
    async fn google_credential(
        &self,
        requirement: &ScopeRequirement,
    ) -> Result<GoogleCredential, CredentialError>;

    /// Whether this credential may serve the given requirements at all.
    async fn matches(&self, _requirements: &[ScopeRequirement]) -> bool {
        true
    }

    /// Downcast hook used by [`for_remote`] to keep snapshots as they are.
    fn into_remote(self: Arc<Self>) -> Option<Arc<RemoteCredentials>> {
        None
    }

    /// Returns a token with at least [`MINIMUM_DURATION_SECONDS`] left,
    /// refreshing once if needed.
    ///
    /// `Err(CredentialError::NoAccessToken)` is what older callers knew as a
    /// null token; transport failures come back as their own variants.
    async fn get_access_token(
        &self,
        requirement: &ScopeRequirement,
    ) -> Result<AccessToken, CredentialError> {
        let mut credential = self.google_credential(requirement).await?;

        let near_expiry = credential
            .expires_in_seconds()
            .map_or(true, |secs| secs < MINIMUM_DURATION_SECONDS);
        if near_expiry && !credential.refresh_token().await? {
            return Err(CredentialError::NoAccessToken);
        }

        credential
            .access_token()
            .cloned()
            .ok_or(CredentialError::NoAccessToken)
    }

    /// [`get_access_token`](Self::get_access_token) with every failure
    /// collapsed into `None`.
    async fn access_token_or_none(&self, requirement: &ScopeRequirement) -> Option<AccessToken> {
        match self.get_access_token(requirement).await {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::warn!(id = %self.id(), error = %e, "could not obtain access token");
                None
            }
        }
    }
}
