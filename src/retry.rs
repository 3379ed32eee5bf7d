//! Bounded retries with exponential backoff for Repository Handle calls.

use std::time::Duration;

use backoff::ExponentialBackoff;
use log::warn;

use crate::error::Result;

/// How often, and how patiently, a failing call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero behaves like one.
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Runs `op`, retrying transient failures until the attempt budget is
    /// spent. Non-transient errors are returned immediately.
    pub fn run<T, F>(&self, description: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        let policy = ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        };

        backoff::retry(policy, || {
            attempt += 1;
            match op() {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        description, attempt, attempts, e
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .map_err(|e| match e {
            backoff::Error::Permanent(err) => err,
            backoff::Error::Transient { err, .. } => err,
        })
    }
}
