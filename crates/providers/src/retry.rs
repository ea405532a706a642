//! Retry with exponential backoff for transient upstream failures.

use std::future::Future;
use std::time::Duration;

use wv_domain::error::{Error, Result};

/// Whether an error is worth retrying: connection-level failures and
/// provider 5xx responses, but never validation or cancellation.
fn is_transient(e: &Error) -> bool {
    match e {
        Error::Http(_) | Error::Timeout(_) => true,
        Error::Provider { message, .. } => {
            message.contains("HTTP 5") || message.contains("overloaded")
        }
        _ => false,
    }
}

/// Run `op` up to `1 + max_retries` times with exponential backoff
/// starting at `base_ms`.
pub async fn with_retry<T, F, Fut>(max_retries: u32, base_ms: u64, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && is_transient(&e) => {
                let delay = base_ms.saturating_mul(1u64 << attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %e,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
