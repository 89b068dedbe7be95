//! Bounded retry around remote calls.
//!
//! 404, 403 and 409 are stable remote states and surface immediately as
//! typed errors. Other non-2xx answers and transport timeouts are ephemeral
//! and retried until the attempt budget runs out.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::{ExecutorError, StatusError};

/// Default attempt budget.
pub const RETRY_COUNT: u32 = 5;

/// Default pause between attempts.
pub const SLEEP_DURATION: Duration = Duration::from_secs(15);

/// A remote call the [`Executor`] may issue more than once.
#[async_trait]
pub trait RequestCallable: Send + Sync {
    type Output: Send;

    async fn call(&self) -> Result<Self::Output, ExecutorError>;

    /// False when the request cannot be safely resent (e.g. a streamed body).
    fn can_retry(&self) -> bool {
        true
    }
}

/// A [`RequestCallable`] built from a closure producing a fresh future per
/// attempt.
pub struct FnCallable<F> {
    f: F,
    retryable: bool,
}

/// Wraps `f` so the executor can invoke it once per attempt.
pub fn callable<F>(f: F) -> FnCallable<F> {
    FnCallable { f, retryable: true }
}

impl<F> FnCallable<F> {
    pub fn no_retry(mut self) -> Self {
        self.retryable = false;
        self
    }
}

#[async_trait]
impl<F, Fut, T> RequestCallable for FnCallable<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, ExecutorError>> + Send,
    T: Send,
{
    type Output = T;

    async fn call(&self) -> Result<T, ExecutorError> {
        (self.f)().await
    }

    fn can_retry(&self) -> bool {
        self.retryable
    }
}

/// Sends `request` and returns the body of a 2xx answer. Any other status
/// comes back as [`ExecutorError::Status`] for the executor to classify.
pub async fn send_request(request: reqwest::RequestBuilder) -> Result<String, ExecutorError> {
    let resp = request.send().await.map_err(ExecutorError::from_reqwest)?;
    let status = resp.status();
    let body = resp.text().await.map_err(ExecutorError::from_reqwest)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(ExecutorError::Status(StatusError::new(status.as_u16(), body)))
    }
}

/// Pause schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay after every failed attempt.
    Fixed(Duration),
    /// `base * 2^attempt`, capped at `max`, plus up to `jitter` of noise.
    Exponential {
        base: Duration,
        max: Duration,
        jitter: Duration,
    },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential { base, max, jitter } => {
                let raw = base.saturating_mul(2u32.saturating_pow(attempt));
                let capped = raw.min(*max);
                let jitter_ms = jitter.as_millis() as u64;
                let noise = if jitter_ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=jitter_ms)
                };
                capped + Duration::from_millis(noise)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(SLEEP_DURATION)
    }
}

/// Failure-tolerant runner for [`RequestCallable`]s.
#[derive(Debug, Clone)]
pub struct Executor {
    max_retry: u32,
    compose_retry: bool,
    backoff: Backoff,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(RETRY_COUNT, true)
    }
}

impl Executor {
    /// With `compose_retry == false` the final failure is wrapped in
    /// [`ExecutorError::MaxRetriesExceeded`] so outer retry layers stop.
    /// A budget of zero is raised to one attempt.
    pub fn new(max_retry: u32, compose_retry: bool) -> Self {
        Self {
            max_retry: max_retry.max(1),
            compose_retry,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }

    /// The executor's own pause, exposed so callers can layer their own
    /// retry logic on the same schedule.
    pub async fn sleep(&self, attempt: u32) {
        sleep(self.backoff.delay(attempt)).await;
    }

    pub async fn execute<C>(&self, block: &C) -> Result<C::Output, ExecutorError>
    where
        C: RequestCallable + ?Sized,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match block.call().await {
                Ok(value) => return Ok(value),
                Err(ExecutorError::Status(s)) => match s.status {
                    404 => return Err(ExecutorError::NotFound(s)),
                    403 => return Err(ExecutorError::Forbidden(s)),
                    409 => return Err(ExecutorError::Conflict(s)),
                    _ => {
                        warn!(
                            attempt,
                            max = self.max_retry,
                            status = s.status,
                            "remote call failed, will retry"
                        );
                        ExecutorError::Status(s)
                    }
                },
                Err(e @ ExecutorError::Timeout(_)) => {
                    warn!(
                        attempt,
                        max = self.max_retry,
                        error = %e,
                        "remote call timed out, will retry"
                    );
                    e
                }
                Err(e) => return Err(e),
            };

            if !block.can_retry() {
                debug!("request cannot be resent, giving up after one attempt");
                return Err(self.propagate(err));
            }
            if attempt >= self.max_retry {
                return Err(self.propagate(err));
            }
            self.sleep(attempt - 1).await;
        }
    }

    fn propagate(&self, last: ExecutorError) -> ExecutorError {
        if self.compose_retry {
            last
        } else {
            ExecutorError::MaxRetriesExceeded(Box::new(last))
        }
    }
}
