use crate::error::{GatewayError, Result};
use std::future::Future;
use std::time::Duration;

/// Bounded, exponentially backed-off retry for transient persistence
/// conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before retry number `retry` (zero based), or `None` once the
    /// budget is spent.
    pub fn backoff(&self, retry: u32) -> Option<Duration> {
        if retry >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(retry);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

/// Runs `op`, re-issuing it while it fails with a transient persistence
/// conflict and the policy allows. An exhausted budget turns the conflict
/// into `PersistenceFatal`.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Err(err) if err.is_transient() => match policy.backoff(retry) {
                Some(delay) => {
                    tracing::warn!(
                        operation = label,
                        retry = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient persistence conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                None => {
                    return Err(GatewayError::PersistenceFatal(format!(
                        "{label}: conflict persisted after {retry} retries: {err}"
                    )));
                }
            },
            other => return other,
        }
    }
}
