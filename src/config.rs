//! Runtime configuration for the gateway components.
//!
//! Every knob has a default; the binary overrides them from command-line
//! flags and environment variables.

use crate::application::retry::RetryPolicy;
use std::time::Duration;

/// Default request-level timeout for a single issuer call.
pub const DEFAULT_ISSUER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts for an issuer call the issuer asked to defer.
pub const DEFAULT_ISSUER_ATTEMPTS: u32 = 3;

/// Default path of the issuer endpoint on the issuing domain.
pub const DEFAULT_ISSUER_PATH: &str = "/issuer";

/// Settings for the payment resolution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout imposed on every issuer call. Expiry counts as the issuer
    /// being unavailable.
    pub issuer_timeout: Duration,
    /// Total attempts for a deferred `begin` or `verify`.
    pub issuer_attempts: u32,
    /// Delay between deferred attempts.
    pub issuer_backoff: Duration,
    /// Retry policy for transient persistence conflicts.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            issuer_timeout: DEFAULT_ISSUER_TIMEOUT,
            issuer_attempts: DEFAULT_ISSUER_ATTEMPTS,
            issuer_backoff: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_issuer_timeout(mut self, timeout: Duration) -> Self {
        self.issuer_timeout = timeout;
        self
    }

    pub fn with_issuer_attempts(mut self, attempts: u32) -> Self {
        self.issuer_attempts = attempts.max(1);
        self
    }

    pub fn with_issuer_backoff(mut self, backoff: Duration) -> Self {
        self.issuer_backoff = backoff;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Settings for the HTTP issuer client.
#[derive(Debug, Clone)]
pub struct IssuerHttpConfig {
    /// `https` in production. Plain `http` exists for local issuers.
    pub scheme: String,
    pub path: String,
    /// Transport-level timeout, independent of the engine's call timeout.
    pub timeout: Duration,
}

impl Default for IssuerHttpConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            path: DEFAULT_ISSUER_PATH.to_string(),
            timeout: DEFAULT_ISSUER_TIMEOUT,
        }
    }
}

impl IssuerHttpConfig {
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
