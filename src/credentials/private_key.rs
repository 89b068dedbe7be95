//! Credentials that sign their own JWT bearer assertion with a service
//! account's private key and trade it for an access token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;

use super::{
    CredentialInfo, CredentialsModule, Descriptor, RobotCredentials, PRIVATE_KEY_DESCRIPTOR,
};
use crate::errors::{CredentialError, ExecutorError};
use crate::executor::{callable, send_request, Executor};
use crate::keys::ServiceAccountConfig;
use crate::scope::ScopeRequirement;
use crate::token::{AccessToken, GoogleCredential, TokenResponse, TokenSource};

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

pub struct PrivateKeyCredentials {
    info: CredentialInfo,
    service_account: Arc<dyn ServiceAccountConfig>,
    module: CredentialsModule,
}

impl PrivateKeyCredentials {
    pub fn new(
        info: CredentialInfo,
        service_account: Arc<dyn ServiceAccountConfig>,
        module: CredentialsModule,
    ) -> Self {
        Self {
            info,
            service_account,
            module,
        }
    }

    fn account_id(&self) -> Result<String, CredentialError> {
        self.service_account
            .account_id()
            .ok_or_else(|| CredentialError::Key("service account has no client email".into()))
    }
}

impl std::fmt::Debug for PrivateKeyCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyCredentials")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RobotCredentials for PrivateKeyCredentials {
    fn info(&self) -> &CredentialInfo {
        &self.info
    }

    fn descriptor(&self) -> Result<&'static Descriptor, CredentialError> {
        Ok(&PRIVATE_KEY_DESCRIPTOR)
    }

    async fn username(&self) -> Result<String, CredentialError> {
        self.account_id()
    }

    async fn google_credential(
        &self,
        requirement: &ScopeRequirement,
    ) -> Result<GoogleCredential, CredentialError> {
        let account_id = self.account_id()?;
        let pem = self
            .service_account
            .private_key()
            .ok_or_else(|| CredentialError::Key("service account has no private key".into()))?;
        let key = EncodingKey::from_rsa_pem(pem.expose().as_bytes())?;

        let source = JwtBearerSource {
            account_id: account_id.clone(),
            key,
            scopes: requirement.scopes().map(String::from).collect(),
            token_uri: self.module.token_uri.clone(),
            http: self.module.http.clone(),
            executor: self.module.executor.clone(),
        };
        Ok(GoogleCredential::new(Arc::new(source)).with_service_account_id(account_id))
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Signs a fresh assertion on every fetch and posts it to the token
/// endpoint through the executor.
struct JwtBearerSource {
    account_id: String,
    key: EncodingKey,
    scopes: Vec<String>,
    token_uri: String,
    http: reqwest::Client,
    executor: Executor,
}

impl JwtBearerSource {
    fn sign(&self, now: i64) -> Result<String, CredentialError> {
        let claims = AssertionClaims {
            iss: &self.account_id,
            scope: self.scopes.join(" "),
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.key)?)
    }

    async fn exchange(&self, assertion: &str) -> Result<String, ExecutorError> {
        let request = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)]);
        send_request(request).await
    }
}

#[async_trait]
impl TokenSource for JwtBearerSource {
    async fn fetch_token(&self) -> Result<Option<AccessToken>, CredentialError> {
        let assertion = self.sign(Utc::now().timestamp())?;
        let body = self
            .executor
            .execute(&callable(|| self.exchange(&assertion)))
            .await?;

        let resp: TokenResponse = serde_json::from_str(&body).map_err(ExecutorError::from)?;
        if resp.access_token.is_empty() {
            return Ok(None);
        }
        tracing::debug!(
            account = %self.account_id,
            expires_in = ?resp.expires_in,
            "exchanged jwt assertion"
        );
        Ok(Some(AccessToken::from_response(resp, Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::JsonServiceAccountConfig;
    use crate::metadata::HttpMetadataReader;
    use base64::Engine;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    const KEY_JSON: &str = include_str!("../../tests/fixtures/robot_key.json");

    fn credentials(token_uri: String, max_retry: u32) -> PrivateKeyCredentials {
        let http = reqwest::Client::new();
        let key = JsonServiceAccountConfig::from_json(Some("robot_key.json"), KEY_JSON).unwrap();
        let module = CredentialsModule::new(
            http,
            Executor::new(max_retry, true),
            Arc::new(HttpMetadataReader::default()),
            token_uri,
        );
        PrivateKeyCredentials::new(
            CredentialInfo::new("robot", "my-google-project"),
            Arc::new(key),
            module,
        )
    }

    fn assertion_claims(req: &Request) -> serde_json::Value {
        let body = String::from_utf8(req.body.clone()).unwrap();
        let assertion = body
            .split('&')
            .find_map(|kv| kv.strip_prefix("assertion="))
            .unwrap();
        let payload = assertion.split('.').nth(1).unwrap();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(payload)
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_username_is_client_email() {
        let creds = credentials("http://unused/token".into(), 1);
        assert_eq!(
            creds.username().await.unwrap(),
            "robot@my-google-project.iam.gserviceaccount.com"
        );
    }

    #[tokio::test]
    async fn test_exchanges_signed_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"access_token":"ya29.signed","expires_in":3600,"token_type":"Bearer"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let token_uri = format!("{}/token", server.uri());
        let creds = credentials(token_uri.clone(), 1);
        let requirement = ScopeRequirement::google(["scope.b", "scope.a"]);

        let token = creds.get_access_token(&requirement).await.unwrap();
        assert_eq!(token.value.expose(), "ya29.signed");

        let requests = server.received_requests().await.unwrap();
        let claims = assertion_claims(&requests[0]);
        assert_eq!(claims["iss"], "robot@my-google-project.iam.gserviceaccount.com");
        assert_eq!(claims["aud"], token_uri.as_str());
        assert_eq!(claims["scope"], "scope.a scope.b");
        assert_eq!(
            claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
            ASSERTION_LIFETIME_SECS
        );
    }

    #[tokio::test]
    async fn test_token_endpoint_forbidden_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .expect(1)
            .mount(&server)
            .await;

        let creds = credentials(format!("{}/token", server.uri()), 5);
        let err = creds
            .get_access_token(&ScopeRequirement::google(["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Executor(ExecutorError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_missing_key_material() {
        let key = JsonServiceAccountConfig::from_json(
            None,
            r#"{"client_email":"robot@example.com","private_key":"not a pem"}"#,
        )
        .unwrap();
        let module = CredentialsModule::new(
            reqwest::Client::new(),
            Executor::default(),
            Arc::new(HttpMetadataReader::default()),
            "http://unused/token",
        );
        let creds =
            PrivateKeyCredentials::new(CredentialInfo::new("bad", "p"), Arc::new(key), module);

        let err = creds
            .google_credential(&ScopeRequirement::google(["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Jwt(_)));
    }
}
