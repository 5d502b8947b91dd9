//! Uniform retry wrapper for fallible I/O. Every outbound HTTP call and every
//! store operation goes through [`Retryer::run`].

use {
    std::{future::Future, time::Duration},
    tokio_util::sync::CancellationToken,
};

/// Whether a failed attempt is worth repeating.
#[derive(Debug)]
pub enum Transience {
    /// Transient I/O: network errors, timeouts, 5xx, 429. `retry_after`
    /// carries a server-provided hint that overrides the backoff schedule.
    Transient { retry_after: Option<Duration> },
    /// Permanent: 4xx other than 429, validation failures, malformed input.
    /// Retrying cannot help.
    Fatal,
}

/// One failed attempt together with its classification.
#[derive(Debug)]
pub struct AttemptError {
    pub error: anyhow::Error,
    pub transience: Transience,
}

impl AttemptError {
    pub fn transient(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            transience: Transience::Transient { retry_after: None },
        }
    }

    pub fn transient_after(error: impl Into<anyhow::Error>, retry_after: Duration) -> Self {
        Self {
            error: error.into(),
            transience: Transience::Transient {
                retry_after: Some(retry_after),
            },
        }
    }

    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            transience: Transience::Fatal,
        }
    }

    /// Classifies a transport-level reqwest error. Status-bearing responses
    /// are classified by the caller from the response itself so that
    /// `Retry-After` headers remain accessible.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() || error.is_request() {
            Self::transient(error)
        } else {
            Self::fatal(error)
        }
    }

    /// Classifies a database error: I/O and pool conditions are worth
    /// retrying, constraint and decode failures are not.
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::transient(error),
            _ => Self::fatal(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("{label} failed after {attempts} attempts: {source}")]
    Exhausted {
        label: &'static str,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("{label} failed: {source}")]
    Fatal {
        label: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("{label} cancelled")]
    Cancelled { label: &'static str },
}

impl RetryError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Executes attempts with exponential backoff: attempt `i` is followed by a
/// wait of `base_delay * 2^(i-1)` unless the error carried a `Retry-After`
/// hint. Cancellation is observed before every attempt and during every wait.
#[derive(Clone, Debug)]
pub struct Retryer {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for Retryer {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl Retryer {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        label: &'static str,
        mut attempt: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        for i in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled { label });
            }
            let error = match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match error.transience {
                Transience::Fatal => {
                    return Err(RetryError::Fatal {
                        label,
                        source: error.error,
                    });
                }
                Transience::Transient { retry_after } => {
                    if i == self.max_attempts {
                        return Err(RetryError::Exhausted {
                            label,
                            attempts: self.max_attempts,
                            source: error.error,
                        });
                    }
                    let delay = retry_after.unwrap_or_else(|| self.backoff(i));
                    tracing::warn!(
                        %label,
                        attempt = i,
                        ?delay,
                        error = ?error.error,
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled { label }),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        unreachable!("loop either returns a value or an error")
    }

    /// `base * 2^(attempt-1)`, saturating.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX))
    }
}
