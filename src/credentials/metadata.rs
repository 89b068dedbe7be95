//! Credentials backed by the instance's own service account, as exposed by
//! the metadata service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OnceCell;

use super::{CredentialInfo, CredentialsModule, Descriptor, RobotCredentials, METADATA_DESCRIPTOR};
use crate::errors::{CredentialError, ExecutorError};
use crate::executor::{callable, Executor};
use crate::metadata::{self, MetadataReader};
use crate::scope::{Domain, ScopeRequirement, ScopeSpecification};
use crate::token::{AccessToken, GoogleCredential, TokenResponse, TokenSource};

pub struct MetadataCredentials {
    info: CredentialInfo,
    module: CredentialsModule,
    /// The instance's scope restriction, read once on first match.
    metadata_scopes: OnceCell<Domain>,
}

impl MetadataCredentials {
    pub fn new(info: CredentialInfo, module: CredentialsModule) -> Self {
        Self {
            info,
            module,
            metadata_scopes: OnceCell::new(),
        }
    }

    /// The project this instance runs in, if the metadata service says so.
    pub async fn default_project(reader: &dyn MetadataReader) -> Option<String> {
        reader.read_metadata(metadata::PROJECT_ID_PATH).await.ok()
    }

    /// The scopes this instance's service account is limited to. Empty when
    /// the metadata service cannot be read.
    pub async fn default_scopes(reader: &dyn MetadataReader) -> Vec<String> {
        match reader.read_metadata(metadata::SCOPES_PATH).await {
            Ok(listing) => metadata::parse_scopes(&listing),
            Err(e) => {
                tracing::debug!(error = %e, "could not read instance scopes");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for MetadataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCredentials")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RobotCredentials for MetadataCredentials {
    fn info(&self) -> &CredentialInfo {
        &self.info
    }

    fn descriptor(&self) -> Result<&'static Descriptor, CredentialError> {
        Ok(&METADATA_DESCRIPTOR)
    }

    async fn username(&self) -> Result<String, CredentialError> {
        let email = self
            .module
            .metadata
            .read_metadata(metadata::IDENTITY_PATH)
            .await?;
        Ok(email.trim().to_string())
    }

    async fn google_credential(
        &self,
        _requirement: &ScopeRequirement,
    ) -> Result<GoogleCredential, CredentialError> {
        // the metadata token cannot be down-scoped; matches() guards instead
        Ok(GoogleCredential::new(Arc::new(MetadataTokenSource {
            reader: Arc::clone(&self.module.metadata),
            executor: self.module.executor.clone(),
        })))
    }

    async fn matches(&self, requirements: &[ScopeRequirement]) -> bool {
        let domain = self
            .metadata_scopes
            .get_or_init(|| async {
                let scopes = Self::default_scopes(self.module.metadata.as_ref()).await;
                Domain::new("metadata", vec![ScopeSpecification::google(scopes)])
            })
            .await;
        domain.test(requirements)
    }
}

/// Fetches the default service account's token from the metadata service.
struct MetadataTokenSource {
    reader: Arc<dyn MetadataReader>,
    executor: Executor,
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn fetch_token(&self) -> Result<Option<AccessToken>, CredentialError> {
        let body = self
            .executor
            .execute(&callable(|| self.reader.read_metadata(metadata::TOKEN_PATH)))
            .await?;
        let resp: TokenResponse = serde_json::from_str(&body).map_err(ExecutorError::from)?;
        if resp.access_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(AccessToken::from_response(resp, Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::HttpMetadataReader;
    use crate::scope::ProviderKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SA: &str = "/computeMetadata/v1/instance/service-accounts/default";

    async fn credentials_for(server: &MockServer) -> MetadataCredentials {
        let http = reqwest::Client::new();
        let reader = Arc::new(HttpMetadataReader::new(
            format!("{}/computeMetadata/v1", server.uri()),
            http.clone(),
        ));
        let module = CredentialsModule::new(http, Executor::new(1, true), reader, "http://unused");
        MetadataCredentials::new(CredentialInfo::new("meta", "my-google-project"), module)
    }

    #[tokio::test]
    async fn test_username_is_instance_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{SA}/email")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("robot@my-google-project.iam.gserviceaccount.com\n"),
            )
            .mount(&server)
            .await;

        let creds = credentials_for(&server).await;
        assert_eq!(
            creds.username().await.unwrap(),
            "robot@my-google-project.iam.gserviceaccount.com"
        );
    }

    #[tokio::test]
    async fn test_access_token_from_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{SA}/token")))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"access_token":"ya29.meta","expires_in":3599,"token_type":"Bearer"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let creds = credentials_for(&server).await;
        let token = creds
            .get_access_token(&ScopeRequirement::google(["a"]))
            .await
            .unwrap();
        assert_eq!(token.value.expose(), "ya29.meta");
    }

    #[tokio::test]
    async fn test_huge_token_lifetime_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{SA}/token")))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"access_token":"x","expires_in":9223372036854775807}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{SA}/email")))
            .respond_with(ResponseTemplate::new(200).set_body_string("robot@example.iam"))
            .mount(&server)
            .await;

        let creds: Arc<dyn RobotCredentials> = Arc::new(credentials_for(&server).await);
        let req = ScopeRequirement::google(["a"]);

        let token = creds.get_access_token(&req).await.unwrap();
        assert_eq!(token.value.expose(), "x");
        assert_eq!(token.expires_at, None);

        let err = crate::credentials::for_remote(&creds, &req).await.unwrap_err();
        assert!(matches!(err, CredentialError::Security(_)));
    }

    #[tokio::test]
    async fn test_matches_instance_scopes_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{SA}/scopes")))
            .respond_with(ResponseTemplate::new(200).set_body_string("scope.a\nscope.b\n"))
            .expect(1)
            .mount(&server)
            .await;

        let creds = credentials_for(&server).await;
        assert!(creds.matches(&[ScopeRequirement::google(["scope.a"])]).await);
        assert!(!creds.matches(&[ScopeRequirement::google(["scope.c"])]).await);
        assert!(
            creds
                .matches(&[ScopeRequirement::new(ProviderKind::Other("x".into()), ["scope.c"])])
                .await
        );
    }

    #[tokio::test]
    async fn test_descriptor_helpers_swallow_failures() {
        let server = MockServer::start().await;
        let reader = HttpMetadataReader::new(server.uri(), reqwest::Client::new());
        assert_eq!(MetadataCredentials::default_project(&reader).await, None);
        assert!(MetadataCredentials::default_scopes(&reader).await.is_empty());
    }
}
