//! Access tokens and the live, refreshable credential that produces them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::errors::CredentialError;

/// Token or key material. Redacted in logs, wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Standard OAuth2 token response, also served by the metadata token path.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// An opaque bearer token and, when known, the instant it stops working.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub value: Secret,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: Secret::new(value),
            expires_at,
        }
    }

    /// A lifetime too large to represent leaves the expiry unknown, which
    /// callers treat as due for refresh. A negative one yields a token that
    /// is already expired.
    pub fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = resp
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime));
        Self::new(resp.access_token, expires_at)
    }

    /// Seconds left before expiry, relative to `now`. Negative once expired.
    pub fn expires_in_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|at| (at - now).num_seconds())
    }
}

/// Where a [`GoogleCredential`] gets a fresh token from.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// `Ok(None)` means the source ran but has nothing to offer.
    async fn fetch_token(&self) -> Result<Option<AccessToken>, CredentialError>;
}

/// A live credential: the current token, if any, and a way to refresh it.
///
/// Each acquisition hands out its own instance; refresh state is never
/// shared between callers.
pub struct GoogleCredential {
    token: Option<AccessToken>,
    source: Option<Arc<dyn TokenSource>>,
    service_account_id: Option<String>,
}

impl GoogleCredential {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            token: None,
            source: Some(source),
            service_account_id: None,
        }
    }

    /// A credential pinned to one token that can never be refreshed.
    pub fn fixed(token: AccessToken) -> Self {
        Self {
            token: Some(token),
            source: None,
            service_account_id: None,
        }
    }

    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_service_account_id(mut self, id: impl Into<String>) -> Self {
        self.service_account_id = Some(id.into());
        self
    }

    pub fn service_account_id(&self) -> Option<&str> {
        self.service_account_id.as_deref()
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    pub fn expires_in_seconds(&self) -> Option<i64> {
        self.token
            .as_ref()
            .and_then(|t| t.expires_in_seconds(Utc::now()))
    }

    /// Asks the source for a new token. `Ok(false)` when there is no source
    /// or it produced nothing; the old token is kept in that case.
    pub async fn refresh_token(&mut self) -> Result<bool, CredentialError> {
        let Some(source) = self.source.as_ref() else {
            return Ok(false);
        };
        match source.fetch_token().await? {
            Some(token) => {
                self.token = Some(token);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl fmt::Debug for GoogleCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleCredential")
            .field("token", &self.token)
            .field("refreshable", &self.source.is_some())
            .field("service_account_id", &self.service_account_id)
            .finish()
    }
}
