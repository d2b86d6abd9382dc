//! Fixed-backoff retry around upstream calls.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{ClaimsClient, ClientError};
use crate::fhir::Bundle;

/// Errors that can tell whether another attempt may succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for ClientError {
    fn is_transient(&self) -> bool {
        ClientError::is_transient(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Runs `op` until it succeeds, fails with a permanent error, or the
    /// attempts are used up. The last error is returned.
    pub fn execute<T, E, F>(&self, name: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_transient() => {
                    log::debug!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        name,
                        attempt,
                        attempts,
                        self.backoff,
                        e
                    );
                    thread::sleep(self.backoff);
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        log::warn!("{} failed after {} attempts: {}", name, attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Wraps a [`ClaimsClient`] so every page fetch goes through a [`RetryPolicy`].
pub struct RetryingClaimsClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ClaimsClient> RetryingClaimsClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl<C: ClaimsClient> ClaimsClient for RetryingClaimsClient<C> {
    fn fetch_first_page(
        &self,
        patient_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Bundle, ClientError> {
        self.policy.execute("fetch_first_page", || {
            self.inner.fetch_first_page(patient_id, since)
        })
    }

    fn fetch_next_page(&self, bundle: &Bundle) -> Result<Bundle, ClientError> {
        self.policy
            .execute("fetch_next_page", || self.inner.fetch_next_page(bundle))
    }
}
