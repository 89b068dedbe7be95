//! Key material providers for private-key robot credentials.

use serde::{Deserialize, Serialize};

use crate::token::Secret;

/// Supplies the account identity and signing key of a service account.
/// Container formats are the provider's business.
pub trait ServiceAccountConfig: Send + Sync {
    fn account_id(&self) -> Option<String>;

    /// PEM-encoded RSA private key (PKCS#8 or PKCS#1).
    fn private_key(&self) -> Option<Secret>;
}

#[derive(Deserialize)]
struct JsonKey {
    client_email: Option<String>,
    private_key: Option<Secret>,
}

/// A service account JSON key kept in memory as the raw uploaded bytes.
#[derive(Clone, Serialize, Deserialize)]
pub struct JsonServiceAccountConfig {
    #[serde(default)]
    filename: Option<String>,
    secret_json_key: Secret,
}

impl JsonServiceAccountConfig {
    /// Accepts the key only if it carries both an email and a private key.
    pub fn from_json(filename: Option<&str>, contents: &str) -> Option<Self> {
        let key: JsonKey = match serde_json::from_str(contents) {
            Ok(k) => k,
            Err(e) => {
                tracing::error!(error = %e, "failed to read json key");
                return None;
            }
        };
        if key.client_email.is_none() || key.private_key.is_none() {
            return None;
        }
        Some(Self {
            filename: filename.map(extract_filename),
            secret_json_key: Secret::new(contents),
        })
    }

    /// Original upload name with any directory stripped.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn json_key(&self) -> Option<JsonKey> {
        serde_json::from_str(self.secret_json_key.expose()).ok()
    }
}

impl std::fmt::Debug for JsonServiceAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonServiceAccountConfig")
            .field("filename", &self.filename)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountConfig for JsonServiceAccountConfig {
    fn account_id(&self) -> Option<String> {
        self.json_key().and_then(|k| k.client_email)
    }

    fn private_key(&self) -> Option<Secret> {
        self.json_key()
            .and_then(|k| k.private_key)
            .filter(|k| !k.expose().is_empty())
    }
}

/// Drops everything up to the last `/` or `\`.
pub fn extract_filename(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}
