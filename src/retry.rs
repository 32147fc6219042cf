//! Retry wrapper for transient engine failures.
//!
//! Network-shaped failures (connection resets, timeouts, 5xx,
//! rate limits) are worth retrying with backoff; everything else is a
//! real answer and is returned verbatim.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;

use crate::engine::{Engine, EngineOptions, EngineResult, ProgressCallback};

/// Retry knobs: `max_retries` *additional* attempts after the first,
/// `retry_delay` as the initial backoff step.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Engine failure that looks transient and was raised to trigger a retry.
#[derive(Debug, Error)]
#[error("transient engine error: {0}")]
pub struct TransientError(pub String);

const RETRYABLE_SIGNATURES: &[&str] = &[
    "econnreset",
    "econnrefused",
    "epipe",
    "etimedout",
    "timed out",
    "timeout",
    "socket hang up",
    "enotfound",
    "eai_again",
    "network error",
    "rate limit",
    "rate_limit",
    "too many requests",
    "overloaded",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "429",
    "500",
    "502",
    "503",
    "504",
    "529",
];

/// Whether an engine error string matches a known transient signature.
pub fn is_retryable(error: &str) -> bool {
    let lowered = error.to_lowercase();
    RETRYABLE_SIGNATURES.iter().any(|s| lowered.contains(s))
}

/// Invoke the engine under the retry policy. Transient failures are
/// retried with exponentially growing delay; non-retryable failures
/// come back as a plain unsuccessful [`EngineResult`]. Exhausted
/// retries surface the last transient error.
pub async fn execute_with_retry(
    engine: &dyn Engine,
    prompt: &str,
    work_dir: &Path,
    on_progress: ProgressCallback,
    options: &EngineOptions,
    policy: &RetryPolicy,
) -> Result<EngineResult> {
    let attempt = || async {
        let result = engine
            .execute_streaming(prompt, work_dir, on_progress.clone(), options)
            .await?;
        if !result.success {
            if let Some(error) = &result.error {
                if is_retryable(error) {
                    return Err(anyhow::Error::new(TransientError(error.clone())));
                }
            }
        }
        Ok(result)
    };

    attempt
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(policy.retry_delay)
                .with_max_times(policy.max_retries),
        )
        .when(|err: &anyhow::Error| err.downcast_ref::<TransientError>().is_some())
        .notify(|err, delay| {
            tracing::warn!("engine call failed, retrying in {delay:?}: {err}");
        })
        .await
}
