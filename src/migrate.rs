//! Persisted credential records and their load-time upgrade.

use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialInfo, CredentialKind, CredentialsScope};
use crate::keys::JsonServiceAccountConfig;

/// A credential as it sits in the store. Older records may lack `id` and
/// `scope`; run them through [`upgrade`] before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<CredentialsScope>,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: RecordKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordKind {
    Metadata,
    PrivateKey { service_account: JsonServiceAccountConfig },
}

impl RecordKind {
    pub fn kind(&self) -> CredentialKind {
        match self {
            RecordKind::Metadata => CredentialKind::Metadata,
            RecordKind::PrivateKey { .. } => CredentialKind::PrivateKey,
        }
    }
}

impl CredentialRecord {
    /// The shared fields of an upgraded record.
    pub fn info(&self) -> CredentialInfo {
        CredentialInfo {
            id: self.id.clone().unwrap_or_else(|| self.project_id.clone()),
            project_id: self.project_id.clone(),
            scope: self.scope.unwrap_or_default(),
            description: self.description.clone(),
        }
    }
}

/// Fills in what older records left out: the id defaults to the project id
/// and the scope to GLOBAL. Running it twice changes nothing.
pub fn upgrade(mut record: CredentialRecord) -> CredentialRecord {
    if record.id.as_deref().map_or(true, str::is_empty) {
        record.id = Some(record.project_id.clone());
    }
    if record.scope.is_none() {
        record.scope = Some(CredentialsScope::Global);
    }
    record
}
