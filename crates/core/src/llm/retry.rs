//! Retry policy for provider calls (spec §4.4 "Retries").
//!
//! Shape grounded on `stencila-agents::api_session`'s retry loop: an
//! attempt counter, a `resolve_delay` that decides whether/how long to wait
//! next, and the caller driving `tokio::time::sleep` itself.

use rand::Rng;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_secs: f64,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay_secs: 1.0, factor: 2.0, jitter: 0.20 }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// Decide whether `error` on `attempt` (0-indexed) should be retried,
    /// and if so after how many seconds. Schema/validation errors never
    /// retry; transport errors and provider 5xx/429 do, up to
    /// `max_retries`.
    pub fn resolve_delay(&self, error: &CoreError, attempt: u32) -> Option<f64> {
        if attempt >= self.max_retries {
            return None;
        }
        if !is_retryable(error) {
            return None;
        }

        let base = self.base_delay_secs * self.factor.powi(attempt as i32);
        let jitter_span = base * self.jitter;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Some((base + jitter).max(0.0))
    }
}

fn is_retryable(error: &CoreError) -> bool {
    match error {
        CoreError::ProviderError { retryable, .. } => *retryable,
        CoreError::Timeout { .. } => true,
        CoreError::Io { .. } => true,
        _ => false,
    }
}
