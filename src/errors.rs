use thiserror::Error;

/// A non-2xx answer from a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status}: {body}")]
pub struct StatusError {
    pub status: u16,
    pub body: String,
}

impl StatusError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failures surfaced by the [`Executor`](crate::executor::Executor) and the
/// [`MetadataReader`](crate::metadata::MetadataReader).
///
/// `NotFound`, `Forbidden` and `Conflict` are stable remote states and are
/// never retried. `Status` and `Timeout` are ephemeral and retried up to the
/// executor's budget.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("not found: {0}")]
    NotFound(StatusError),

    #[error("forbidden: {0}")]
    Forbidden(StatusError),

    #[error("conflict: {0}")]
    Conflict(StatusError),

    #[error("remote error: {0}")]
    Status(StatusError),

    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("retries exhausted: {0}")]
    MaxRetriesExceeded(#[source] Box<ExecutorError>),
}

impl ExecutorError {
    /// Sorts a reqwest failure into the ephemeral (`Timeout`) or terminal
    /// (`Transport`) bucket.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ExecutorError::Timeout(e)
        } else {
            ExecutorError::Transport(e)
        }
    }

    /// The HTTP status behind this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ExecutorError::NotFound(s)
            | ExecutorError::Forbidden(s)
            | ExecutorError::Conflict(s)
            | ExecutorError::Status(s) => Some(s.status),
            ExecutorError::MaxRetriesExceeded(inner) => inner.status(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExecutorError {
    fn from(e: serde_json::Error) -> Self {
        ExecutorError::Decode(e.to_string())
    }
}

/// Failures while acquiring, refreshing or remoting a credential's token.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Local failure to obtain a usable token. Fatal to the current operation.
    #[error("security error: {0}")]
    Security(String),

    /// The refresh completed but produced no token. Historically reported to
    /// callers as a null access token.
    #[error("no access token could be obtained")]
    NoAccessToken,

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("invalid key material: {0}")]
    Key(String),

    #[error("failed to sign assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
