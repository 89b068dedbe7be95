use serde::Deserialize;

use crate::credentials::DEFAULT_TOKEN_URI;
use crate::executor::{RETRY_COUNT, SLEEP_DURATION};
use crate::metadata::METADATA_SERVER;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the instance metadata service.
    pub metadata_url: String,
    /// OAuth2 token endpoint for private-key credentials.
    pub token_uri: String,
    /// Attempt budget of the executor. Set via GAUTH_MAX_RETRY. Default: 5.
    pub max_retry: u32,
    /// Pause between attempts in seconds. Set via GAUTH_RETRY_DELAY_SECS. Default: 15.
    pub retry_delay_secs: u64,
    /// Grow the pause exponentially instead of keeping it fixed.
    pub exponential_backoff: bool,
    /// When false, exhausted retries surface as MaxRetriesExceeded.
    pub compose_retry: bool,
    pub http_timeout_secs: u64,
    /// YAML or JSON list of persisted credential records.
    pub credentials_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_url: METADATA_SERVER.into(),
            token_uri: DEFAULT_TOKEN_URI.into(),
            max_retry: RETRY_COUNT,
            retry_delay_secs: SLEEP_DURATION.as_secs(),
            exponential_backoff: false,
            compose_retry: true,
            http_timeout_secs: 30,
            credentials_file: "credentials.yaml".into(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let metadata_url = std::env::var("GAUTH_METADATA_URL").unwrap_or(defaults.metadata_url);
    let token_uri = std::env::var("GAUTH_TOKEN_URI").unwrap_or(defaults.token_uri);
    for (name, value) in [
        ("GAUTH_METADATA_URL", &metadata_url),
        ("GAUTH_TOKEN_URI", &token_uri),
    ] {
        if let Err(e) = url::Url::parse(value) {
            anyhow::bail!("{name} is not a valid URL ({value}): {e}");
        }
    }

    let max_retry = env_or("GAUTH_MAX_RETRY", defaults.max_retry);
    if max_retry == 0 {
        anyhow::bail!("GAUTH_MAX_RETRY must allow at least one attempt");
    }

    Ok(Config {
        metadata_url,
        token_uri,
        max_retry,
        retry_delay_secs: env_or("GAUTH_RETRY_DELAY_SECS", defaults.retry_delay_secs),
        exponential_backoff: env_or("GAUTH_EXPONENTIAL_BACKOFF", defaults.exponential_backoff),
        compose_retry: env_or("GAUTH_COMPOSE_RETRY", defaults.compose_retry),
        http_timeout_secs: env_or("GAUTH_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
        credentials_file: std::env::var("GAUTH_CREDENTIALS_FILE")
            .unwrap_or(defaults.credentials_file),
    })
}
