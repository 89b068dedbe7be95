//! Frozen credential snapshots for workers.
//!
//! A worker never receives the robot's secret. The side that holds the key
//! performs one token acquisition and ships the resulting bearer token with
//! its absolute expiry. Snapshots cannot refresh; a worker that outlives the
//! token has to ask for a new snapshot.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CredentialInfo, CredentialsScope, Descriptor, RobotCredentials};
use crate::errors::CredentialError;
use crate::scope::ScopeRequirement;
use crate::token::{AccessToken, GoogleCredential, Secret};

/// Tokens closer than this to expiry are refreshed before being shipped.
pub const REMOTE_MINIMUM_DURATION_SECONDS: i64 = 300;

const NO_ACCESS_TOKEN: &str = "unable to obtain an access token for the remote credential";

/// A credential reduced to one bearer token. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Snapshot", into = "Snapshot")]
pub struct RemoteCredentials {
    info: CredentialInfo,
    username: String,
    access_token: Secret,
    /// Absolute expiry in epoch milliseconds.
    expiration: i64,
}

/// Wire form of [`RemoteCredentials`].
#[derive(Serialize, Deserialize)]
struct Snapshot {
    id: String,
    project_id: String,
    username: String,
    access_token: Secret,
    expiration: i64,
}

impl From<Snapshot> for RemoteCredentials {
    fn from(s: Snapshot) -> Self {
        Self {
            info: CredentialInfo::new(s.id, s.project_id),
            username: s.username,
            access_token: s.access_token,
            expiration: s.expiration,
        }
    }
}

impl From<RemoteCredentials> for Snapshot {
    fn from(r: RemoteCredentials) -> Self {
        Snapshot {
            id: r.info.id.clone(),
            project_id: r.info.project_id.clone(),
            username: r.username.clone(),
            access_token: r.access_token.clone(),
            expiration: r.expiration,
        }
    }
}

impl RemoteCredentials {
    /// Acquires one token from `credentials` and freezes it.
    ///
    /// Fails with [`CredentialError::Security`] rather than ship an expired
    /// or empty token.
    pub async fn capture(
        credentials: &dyn RobotCredentials,
        requirement: &ScopeRequirement,
    ) -> Result<Self, CredentialError> {
        let mut credential = credentials.google_credential(requirement).await?;

        let near_expiry = credential
            .expires_in_seconds()
            .map_or(true, |secs| secs < REMOTE_MINIMUM_DURATION_SECONDS);
        if near_expiry {
            match credential.refresh_token().await {
                Ok(true) => {}
                Ok(false) => return Err(CredentialError::Security(NO_ACCESS_TOKEN.into())),
                Err(e) => {
                    tracing::warn!(
                        id = %credentials.id(),
                        error = %e,
                        "refresh for remote credential failed"
                    );
                    return Err(CredentialError::Security(format!("{NO_ACCESS_TOKEN}: {e}")));
                }
            }
        }

        let token = credential
            .access_token()
            .filter(|t| !t.value.expose().is_empty())
            .ok_or_else(|| CredentialError::Security(NO_ACCESS_TOKEN.into()))?;
        let username = credentials.username().await?;
        let expires_at = token
            .expires_at
            .filter(|at| *at > Utc::now())
            .ok_or_else(|| {
                CredentialError::Security("access token has no usable lifetime".into())
            })?;

        Ok(Self {
            info: CredentialInfo::new(credentials.id(), credentials.project_id()),
            username,
            access_token: token.value.clone(),
            expiration: expires_at.timestamp_millis(),
        })
    }

    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn access_token(&self) -> &Secret {
        &self.access_token
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expiration)
    }
}

#[async_trait]
impl RobotCredentials for RemoteCredentials {
    fn info(&self) -> &CredentialInfo {
        &self.info
    }

    fn scope(&self) -> CredentialsScope {
        CredentialsScope::Global
    }

    fn descriptor(&self) -> Result<&'static Descriptor, CredentialError> {
        Err(CredentialError::UnsupportedOperation(
            "a remote credential snapshot has no descriptor",
        ))
    }

    async fn username(&self) -> Result<String, CredentialError> {
        Ok(self.username.clone())
    }

    /// The frozen token with whatever lifetime it has left. Never refreshes.
    async fn google_credential(
        &self,
        _requirement: &ScopeRequirement,
    ) -> Result<GoogleCredential, CredentialError> {
        let token = AccessToken {
            value: self.access_token.clone(),
            expires_at: self.expires_at(),
        };
        Ok(GoogleCredential::fixed(token).with_service_account_id(self.username.clone()))
    }

    fn into_remote(self: Arc<Self>) -> Option<Arc<RemoteCredentials>> {
        Some(self)
    }
}

/// Returns a snapshot of `credentials` safe to hand to a worker. A snapshot
/// passed in comes back as the same instance.
pub async fn for_remote(
    credentials: &Arc<dyn RobotCredentials>,
    requirement: &ScopeRequirement,
) -> Result<Arc<RemoteCredentials>, CredentialError> {
    if let Some(remote) = Arc::clone(credentials).into_remote() {
        return Ok(remote);
    }
    let snapshot = RemoteCredentials::capture(credentials.as_ref(), requirement).await?;
    tracing::info!(
        id = %snapshot.id(),
        expiration = snapshot.expiration,
        "captured remote credential snapshot"
    );
    Ok(Arc::new(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::PRIVATE_KEY_DESCRIPTOR;
    use crate::token::TokenSource;
    use chrono::Duration;

    const ACCESS_TOKEN: &str = "ThE.ToKeN";
    const USERNAME: &str = "theUserName";
    const PROJECT_ID: &str = "foo.com:bar-baz";

    struct Refresh(Option<AccessToken>);

    #[async_trait]
    impl TokenSource for Refresh {
        async fn fetch_token(&self) -> Result<Option<AccessToken>, CredentialError> {
            Ok(self.0.clone())
        }
    }

    /// A live credential whose current and refreshed tokens are preset.
    #[derive(Debug)]
    struct Live {
        info: CredentialInfo,
        current: Option<AccessToken>,
        refreshed: Option<AccessToken>,
    }

    impl Live {
        fn new(
            current: Option<AccessToken>,
            refreshed: Option<AccessToken>,
        ) -> Arc<dyn RobotCredentials> {
            Arc::new(Self {
                info: CredentialInfo::new("live-id", PROJECT_ID),
                current,
                refreshed,
            })
        }
    }

    #[async_trait]
    impl RobotCredentials for Live {
        fn info(&self) -> &CredentialInfo {
            &self.info
        }

        fn descriptor(&self) -> Result<&'static Descriptor, CredentialError> {
            Ok(&PRIVATE_KEY_DESCRIPTOR)
        }

        async fn username(&self) -> Result<String, CredentialError> {
            Ok(USERNAME.into())
        }

        async fn google_credential(
            &self,
            _requirement: &ScopeRequirement,
        ) -> Result<GoogleCredential, CredentialError> {
            let mut cred = GoogleCredential::new(Arc::new(Refresh(self.refreshed.clone())));
            if let Some(t) = &self.current {
                cred = cred.with_token(t.clone());
            }
            Ok(cred)
        }
    }

    fn expiring_in(secs: i64) -> AccessToken {
        AccessToken::new(ACCESS_TOKEN, Some(Utc::now() + Duration::seconds(secs)))
    }

    fn requirement() -> ScopeRequirement {
        ScopeRequirement::google(["my.scope"])
    }

    #[tokio::test]
    async fn test_reasonable_expiration_is_kept() {
        let live = Live::new(Some(expiring_in(1234)), None);
        let remote = for_remote(&live, &requirement()).await.unwrap();

        assert_eq!(remote.username().await.unwrap(), USERNAME);
        assert_eq!(remote.project_id(), PROJECT_ID);
        assert_eq!(remote.id(), "live-id");
        assert_eq!(remote.scope(), CredentialsScope::Global);

        let cred = remote.google_credential(&requirement()).await.unwrap();
        assert_eq!(cred.access_token().unwrap().value.expose(), ACCESS_TOKEN);
        let left = cred.expires_in_seconds().unwrap();
        assert!((1231..=1234).contains(&left), "lifetime {left}");
    }

    #[tokio::test]
    async fn test_missing_expiration_and_failed_refresh() {
        let live = Live::new(Some(AccessToken::new(ACCESS_TOKEN, None)), None);
        let err = for_remote(&live, &requirement()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Security(_)));
    }

    #[tokio::test]
    async fn test_imminent_expiration_and_failed_refresh() {
        let live = Live::new(Some(expiring_in(60)), None);
        let err = for_remote(&live, &requirement()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Security(_)));
    }

    #[tokio::test]
    async fn test_imminent_expiration_is_refreshed() {
        let refreshed = AccessToken::new("fresh", Some(Utc::now() + Duration::seconds(3600)));
        let live = Live::new(Some(expiring_in(60)), Some(refreshed));
        let remote = for_remote(&live, &requirement()).await.unwrap();
        assert_eq!(remote.access_token().expose(), "fresh");
    }

    #[tokio::test]
    async fn test_refresh_to_expired_token_is_rejected() {
        let stale = AccessToken::new("stale", Some(Utc::now() - Duration::seconds(5)));
        let live = Live::new(None, Some(stale));
        let err = for_remote(&live, &requirement()).await.unwrap_err();
        assert!(matches!(err, CredentialError::Security(_)));
    }

    #[tokio::test]
    async fn test_for_remote_is_idempotent() {
        let live = Live::new(Some(expiring_in(1234)), None);
        let remote = for_remote(&live, &requirement()).await.unwrap();

        let as_credentials: Arc<dyn RobotCredentials> = remote.clone();
        let again = for_remote(&as_credentials, &ScopeRequirement::google(["other"]))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&remote, &again));
    }

    #[tokio::test]
    async fn test_descriptor_is_unsupported() {
        let live = Live::new(Some(expiring_in(1234)), None);
        let remote = for_remote(&live, &requirement()).await.unwrap();
        assert!(matches!(
            remote.descriptor(),
            Err(CredentialError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_survives_the_wire() {
        let live = Live::new(Some(expiring_in(1234)), None);
        let remote = for_remote(&live, &requirement()).await.unwrap();

        let json = serde_json::to_string(remote.as_ref()).unwrap();
        assert!(json.contains("\"access_token\":\"ThE.ToKeN\""));
        let back: RemoteCredentials = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, remote.as_ref());
        assert_eq!(back.expiration(), remote.expiration());
    }
}
