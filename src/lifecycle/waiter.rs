//! Polling State Waiter
//!
//! Polls a remote status accessor on a fixed interval until a target predicate
//! holds, the timeout elapses, or the wait is cancelled.
//!
//! Fetch errors end the wait immediately and are never retried.

use crate::progress::{ProgressEvent, ProgressSink};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a wait did not reach its target
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {elapsed:?} waiting for {description} (last status: {last_status})")]
    Timeout {
        description: String,
        elapsed: Duration,
        last_status: String,
    },

    #[error("failed to fetch status for {description}")]
    Fetch {
        description: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("wait for {description} cancelled")]
    Cancelled { description: String },

    #[error("invalid wait for {description}: {reason}")]
    InvalidSpec { description: String, reason: String },
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Polling parameters for a single wait
#[derive(Debug, Clone)]
pub struct WaitSpec {
    pub description: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl WaitSpec {
    pub fn new(description: impl Into<String>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            description: description.into(),
            poll_interval,
            timeout,
        }
    }

    /// Poll `fetch` until `is_target` holds and return the matching status.
    ///
    /// The first fetch happens immediately; subsequent fetches are spaced by
    /// `poll_interval` (shortened so the last one lands on the deadline).
    pub async fn wait<S, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
        mut fetch: F,
        is_target: P,
    ) -> Result<S, WaitError>
    where
        S: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<S>>,
        P: Fn(&S) -> bool,
    {
        if self.timeout.is_zero() {
            return Err(self.invalid("timeout must be greater than zero"));
        }
        if self.poll_interval.is_zero() {
            return Err(self.invalid("poll interval must be greater than zero"));
        }

        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempts = 0u32;
        let mut last_status: Option<String> = None;

        loop {
            attempts += 1;

            // A hung fetch is bounded by the same deadline and cancellation
            // as the sleep between polls.
            let fetched = tokio::select! {
                fetched = tokio::time::timeout_at(deadline, fetch()) => fetched,
                _ = cancel.cancelled() => return Err(self.cancelled()),
            };

            let status = match fetched {
                Ok(Ok(status)) => status,
                Ok(Err(source)) => {
                    tracing::warn!(
                        resource = %self.description,
                        attempts,
                        error = ?source,
                        "Status fetch failed"
                    );
                    return Err(WaitError::Fetch {
                        description: self.description.clone(),
                        source,
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        resource = %self.description,
                        attempts,
                        "Status fetch still running at the deadline"
                    );
                    return Err(WaitError::Timeout {
                        description: self.description.clone(),
                        elapsed: start.elapsed(),
                        last_status: last_status.unwrap_or_else(|| "no status yet".to_string()),
                    });
                }
            };

            if is_target(&status) {
                tracing::debug!(resource = %self.description, attempts, "Target state reached");
                return Ok(status);
            }

            let elapsed = start.elapsed();
            let observed = status.to_string();
            progress.emit(ProgressEvent::WaitTick {
                description: self.description.clone(),
                elapsed,
                status: observed.clone(),
            });

            if elapsed >= self.timeout {
                return Err(WaitError::Timeout {
                    description: self.description.clone(),
                    elapsed,
                    last_status: observed,
                });
            }
            last_status = Some(observed);

            let delay = self.poll_interval.min(self.timeout - elapsed);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(self.cancelled()),
            }
        }
    }

    fn cancelled(&self) -> WaitError {
        WaitError::Cancelled {
            description: self.description.clone(),
        }
    }

    fn invalid(&self, reason: &str) -> WaitError {
        WaitError::InvalidSpec {
            description: self.description.clone(),
            reason: reason.to_string(),
        }
    }
}
