//! Coordinator configuration.

use crate::domain::attempt::RetryPolicy;
use crate::error::{PaymentError, Result};
use std::time::Duration;

/// Environment variable holding the waiting-window timeout in milliseconds.
pub const TIMEOUT_ENV_VAR: &str = "PAYMENT_TIMEOUT_MS";

/// Default time allowed for the gateway round trip (5 minutes).
pub const DEFAULT_REDIRECT_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Minimum spacing between two initializations.
pub const RETRY_COOLDOWN: Duration = Duration::from_millis(5_000);

/// Initializations allowed before the attempt must be reset.
pub const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long an attempt may stay initializing or awaiting redirect.
    pub redirect_timeout: Duration,
    /// Minimum spacing between initializations.
    pub retry_cooldown: Duration,
    /// Retry ceiling.
    pub max_retries: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            redirect_timeout: DEFAULT_REDIRECT_TIMEOUT,
            retry_cooldown: RETRY_COOLDOWN,
            max_retries: MAX_RETRIES,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from environment variables.
    ///
    /// An unset variable keeps the default; an unparsable one is an error.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(TIMEOUT_ENV_VAR) {
            config.redirect_timeout = parse_timeout_ms(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_redirect_timeout(mut self, timeout: Duration) -> Self {
        self.redirect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.redirect_timeout.is_zero() {
            return Err(PaymentError::ConfigError(
                "Redirect timeout cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            cooldown: self.retry_cooldown,
        }
    }
}

fn parse_timeout_ms(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| {
            PaymentError::ConfigError(format!("{} must be milliseconds: {}", TIMEOUT_ENV_VAR, e))
        })
}
