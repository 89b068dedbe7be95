//! Which credential kinds this process offers, and the store consumers look
//! credentials up in.

use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::{
    CredentialKind, CredentialsModule, Descriptor, MetadataCredentials, PrivateKeyCredentials,
    RobotCredentials, METADATA_DESCRIPTOR, PRIVATE_KEY_DESCRIPTOR,
};
use crate::migrate::{upgrade, CredentialRecord, RecordKind};
use crate::scope::ScopeRequirement;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("credential kind {0:?} is not available in this process")]
    Unregistered(CredentialKind),

    #[error("failed to parse credential records: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Explicit table of the credential kinds built at process start.
#[derive(Debug)]
pub struct CredentialRegistry {
    module: CredentialsModule,
    descriptors: Vec<&'static Descriptor>,
}

impl CredentialRegistry {
    /// An empty table; nothing can be built until kinds are registered.
    pub fn new(module: CredentialsModule) -> Self {
        Self {
            module,
            descriptors: Vec::new(),
        }
    }

    /// Registers the private-key kind, plus the metadata kind when the
    /// metadata service answers.
    pub async fn discover(module: CredentialsModule) -> Self {
        let has_metadata = module.metadata.has_metadata().await;
        let mut registry = Self::new(module);
        registry.register(&PRIVATE_KEY_DESCRIPTOR);
        if has_metadata {
            registry.register(&METADATA_DESCRIPTOR);
        } else {
            tracing::info!("metadata service unavailable, metadata credentials disabled");
        }
        registry
    }

    pub fn register(&mut self, descriptor: &'static Descriptor) {
        if !self.is_registered(descriptor.kind) {
            self.descriptors.push(descriptor);
        }
    }

    pub fn is_registered(&self, kind: CredentialKind) -> bool {
        self.descriptors.iter().any(|d| d.kind == kind)
    }

    pub fn descriptors(&self) -> &[&'static Descriptor] {
        &self.descriptors
    }

    pub fn module(&self) -> &CredentialsModule {
        &self.module
    }

    /// Upgrades `record` and instantiates it.
    pub fn build(&self, record: CredentialRecord) -> Result<Arc<dyn RobotCredentials>, LoadError> {
        let record = upgrade(record);
        let kind = record.kind.kind();
        if !self.is_registered(kind) {
            return Err(LoadError::Unregistered(kind));
        }

        let info = record.info();
        let module = self.module.clone();
        let credentials: Arc<dyn RobotCredentials> = match record.kind {
            RecordKind::Metadata => Arc::new(MetadataCredentials::new(info, module)),
            RecordKind::PrivateKey { service_account } => Arc::new(PrivateKeyCredentials::new(
                info,
                Arc::new(service_account),
                module,
            )),
        };
        Ok(credentials)
    }
}

/// Read-only view of the credentials a consumer may pick from.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credentials willing to serve all of `requirements`.
    async fn lookup(&self, requirements: &[ScopeRequirement]) -> Vec<Arc<dyn RobotCredentials>>;

    async fn lookup_by_id(&self, id: &str) -> Option<Arc<dyn RobotCredentials>>;
}

/// A store loaded once from persisted records.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    credentials: Vec<Arc<dyn RobotCredentials>>,
}

impl InMemoryStore {
    pub fn new(credentials: Vec<Arc<dyn RobotCredentials>>) -> Self {
        Self { credentials }
    }

    pub fn load(
        registry: &CredentialRegistry,
        records: Vec<CredentialRecord>,
    ) -> Result<Self, LoadError> {
        let credentials = records
            .into_iter()
            .map(|r| registry.build(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(credentials))
    }

    /// Parses a YAML (or JSON) list of records.
    pub fn from_yaml(registry: &CredentialRegistry, source: &str) -> Result<Self, LoadError> {
        let records: Vec<CredentialRecord> = serde_yaml::from_str(source)?;
        Self::load(registry, records)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn lookup(&self, requirements: &[ScopeRequirement]) -> Vec<Arc<dyn RobotCredentials>> {
        let mut matched = Vec::new();
        for c in &self.credentials {
            if c.matches(requirements).await {
                matched.push(Arc::clone(c));
            }
        }
        matched
    }

    async fn lookup_by_id(&self, id: &str) -> Option<Arc<dyn RobotCredentials>> {
        self.credentials.iter().find(|c| c.id() == id).cloned()
    }
}

/// `(display name, id)` pairs of the credentials able to serve
/// `requirement`, for pickers. The name is the robot's username when it can
/// be resolved.
pub async fn credentials_list(
    store: &dyn CredentialStore,
    requirement: &ScopeRequirement,
) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for c in store.lookup(std::slice::from_ref(requirement)).await {
        let name = match c.username().await {
            Ok(name) => name,
            Err(e) => {
                tracing::debug!(id = %c.id(), error = %e, "falling back to id for display name");
                c.id().to_string()
            }
        };
        entries.push((name, c.id().to_string()));
    }
    entries
}
