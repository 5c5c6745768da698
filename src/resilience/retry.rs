// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Two entry points: [`retry`] retries every failure (used for store
//! connections and queries, where any error is worth another attempt), and
//! [`retry_if`] consults a predicate so fatal errors short-circuit without
//! burning the backoff budget (used for delivery, where a 4xx must
//! propagate immediately).

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Configuration for operation retry behavior.
///
/// `max_retries` counts retries *after* the initial attempt: a budget of 3
/// allows 4 attempts in total.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::delivery()
    }
}

impl RetryConfig {
    /// Delivery flushes: 3 retries, 1s initial backoff, doubling, 30s cap.
    #[must_use]
    pub fn delivery() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Fast-fail retry for initial store connections.
    /// Detects configuration errors quickly instead of hanging startup.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual queries (don't block forever).
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Retry `operation` on every failure until the budget is exhausted.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, |_| true, operation).await
}

/// Retry `operation` with exponential backoff while `is_retryable` holds.
///
/// A failure the predicate rejects is returned immediately with no sleep;
/// after the budget is exhausted the last error is returned.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if retries > 0 {
                    info!(
                        "Operation '{}' succeeded after {} retries",
                        operation_name, retries
                    );
                }
                return Ok(val);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(
                        "Operation '{}' failed with non-retryable error: {}",
                        operation_name, err
                    );
                    return Err(err);
                }

                if retries >= config.max_retries {
                    warn!(
                        "Operation '{}' exhausted {} retries: {}",
                        operation_name, config.max_retries, err
                    );
                    return Err(err);
                }

                retries += 1;
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name,
                    retries,
                    config.max_retries + 1,
                    err,
                    delay
                );

                sleep(delay).await;
                delay = (delay.mul_f64(config.factor)).min(config.max_delay);
            }
        }
    }
}
