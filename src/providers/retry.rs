// ADSMITH Retry Harness - Backoff With Jitter
// Copyright (c) 2026 AdSmith Collective | ADSMITH
//
// Wraps every provider call in a bounded retry loop. Quota errors back off
// longer than plain transients; permanent and invalid-input errors surface
// immediately.

use crate::error::{ErrorKind, ProviderError};
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Retry attempts per provider call, counting the first.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff before attempt n (1-based): 2^n seconds plus up to 50% jitter.
/// Quota errors double the base.
fn backoff_for(attempt: u32, kind: ErrorKind) -> Duration {
    let base = 2u64.pow(attempt.min(5));
    let base = if kind == ErrorKind::Quota { base * 2 } else { base };
    let jitter_ms = rand::thread_rng().gen_range(0..=base * 500);
    Duration::from_millis(base * 1000 + jitter_ms)
}

/// Execute `run` with retry/backoff. `task_name` labels the log lines.
pub async fn with_retries<T, F, Fut>(
    task_name: &str,
    mut run: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    let started = Instant::now();

    loop {
        attempt += 1;
        match run().await {
            Ok(result) => {
                info!(
                    "[PERF] {} ok on attempt {} ({}ms)",
                    task_name,
                    attempt,
                    started.elapsed().as_millis()
                );
                return Ok(result);
            }
            Err(e) if !e.retryable() => {
                error!("[RETRY] {} permanent failure: {}", task_name, e);
                return Err(e);
            }
            Err(e) => {
                if attempt >= MAX_ATTEMPTS {
                    error!(
                        "[RETRY] {} exhausted {} attempts. Last error: {}",
                        task_name, MAX_ATTEMPTS, e
                    );
                    return Err(e);
                }
                let delay = backoff_for(attempt, e.kind);
                warn!(
                    "[RETRY] {} attempt {} failed ({}), retrying in {:?}",
                    task_name, attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Classify a reqwest transport failure.
pub fn classify_transport(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() || e.is_connect() {
        ErrorKind::Retryable
    } else if e.is_status() {
        e.status()
            .map(|s| ProviderError::kind_for_status(s.as_u16()))
            .unwrap_or(ErrorKind::Retryable)
    } else {
        ErrorKind::Retryable
    }
}
