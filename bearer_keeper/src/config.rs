use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{backoff::ErrorBackoffConfig, Credential};

/// A notification invoked with each newly published credential
///
/// Hooks run on the lifecycle task right after publication and should return quickly.
/// A panicking hook is logged and otherwise ignored.
pub type RenewalHook = Arc<dyn Fn(&Credential) + Send + Sync>;

/// Delay between publishing a credential and starting to acquire its successor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Schedule {
    /// A fixed interval, independent of the credential's reported lifetime
    Fixed(Duration),
    /// Derived from the credential's reported lifetime less the expiry buffer
    FromExpiry(Duration),
}

impl Schedule {
    /// The delay to wait before renewal
    #[inline]
    pub fn delay(&self) -> Duration {
        match *self {
            Schedule::Fixed(d) | Schedule::FromExpiry(d) => d,
        }
    }
}

/// An invalid manager configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Failed acquisitions would be retried without pause
    #[error("retry delay must be greater than zero")]
    ZeroRetryDelay,
    /// The retry backoff cap is below its starting delay
    #[error("maximum retry delay ({max:?}) is less than the initial retry delay ({initial:?})")]
    RetryCapBelowInitial {
        /// The configured initial delay
        initial: Duration,
        /// The configured maximum delay
        max: Duration,
    },
    /// Delays after the first consecutive error would collapse to zero
    #[error("retry backoff multiplier must be greater than zero")]
    ZeroRetryMultiplier,
    /// Expiry-derived schedules need a positive floor
    #[error("minimum renewal delay must be greater than zero")]
    ZeroMinimumDelay,
}

/// Configuration for a [`CredentialManager`][crate::CredentialManager]
///
/// Setters may be chained; a later call replaces the value set by an earlier one.
#[derive(Clone)]
pub struct ManagerConfig {
    renewal_interval: Option<Duration>,
    expiry_buffer: Duration,
    minimum_delay: Duration,
    retry: ErrorBackoffConfig,
    on_renewed: Option<RenewalHook>,
}

impl Default for ManagerConfig {
    /// Default manager configuration
    ///
    /// Renews every 59 minutes, suiting authorities that issue one hour credentials.
    /// Should the fixed interval be cleared, renewal happens 60 seconds before the
    /// reported expiry, but never sooner than 5 seconds after publication. Failed
    /// acquisitions are retried every 5 seconds.
    fn default() -> Self {
        Self {
            renewal_interval: Some(Duration::from_secs(59 * 60)),
            expiry_buffer: Duration::from_secs(60),
            minimum_delay: Duration::from_secs(5),
            retry: ErrorBackoffConfig::default(),
            on_renewed: None,
        }
    }
}

impl ManagerConfig {
    /// Renews on a fixed interval regardless of reported expiry
    ///
    /// A zero interval clears the fixed schedule, deferring to the expiry buffer.
    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = if interval.is_zero() {
            None
        } else {
            Some(interval)
        };
        self
    }

    /// Renews relative to each credential's reported expiry instead of on a fixed interval
    pub fn without_renewal_interval(mut self) -> Self {
        self.renewal_interval = None;
        self
    }

    /// Sets how long before reported expiry to renew when no fixed interval is set
    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    /// Sets the shortest delay an expiry-derived schedule may produce
    pub fn with_minimum_delay(mut self, minimum: Duration) -> Self {
        self.minimum_delay = minimum;
        self
    }

    /// Sets the backoff applied between failed acquisitions
    pub fn with_retry_backoff(mut self, retry: ErrorBackoffConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets a hook to be notified of each newly published credential
    pub fn on_renewed<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Credential) + Send + Sync + 'static,
    {
        self.on_renewed = Some(Arc::new(hook));
        self
    }

    /// The fixed renewal interval, if any
    #[inline]
    pub fn renewal_interval(&self) -> Option<Duration> {
        self.renewal_interval
    }

    /// The buffer subtracted from reported expiry
    #[inline]
    pub fn expiry_buffer(&self) -> Duration {
        self.expiry_buffer
    }

    /// The backoff applied between failed acquisitions
    #[inline]
    pub fn retry_backoff(&self) -> ErrorBackoffConfig {
        self.retry
    }

    pub(crate) fn renewal_hook(&self) -> Option<&RenewalHook> {
        self.on_renewed.as_ref()
    }

    /// Checks the configuration for invalid combinations
    pub fn validate(&self) -> Result<(), ConfigError> {
        let initial = self.retry.initial_error_delay();
        let max = self.retry.max_error_delay();

        if initial.is_zero() {
            return Err(ConfigError::ZeroRetryDelay);
        }

        if max < initial {
            return Err(ConfigError::RetryCapBelowInitial { initial, max });
        }

        if self.retry.multiplier() == 0 {
            return Err(ConfigError::ZeroRetryMultiplier);
        }

        if self.minimum_delay.is_zero() {
            return Err(ConfigError::ZeroMinimumDelay);
        }

        Ok(())
    }

    /// Computes when renewal of `credential` should begin
    pub fn schedule_for(&self, credential: &Credential) -> Schedule {
        match self.renewal_interval {
            Some(interval) => Schedule::Fixed(interval),
            None => Schedule::FromExpiry(
                credential
                    .lifetime()
                    .saturating_sub(self.expiry_buffer)
                    .max(self.minimum_delay),
            ),
        }
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("renewal_interval", &self.renewal_interval)
            .field("expiry_buffer", &self.expiry_buffer)
            .field("minimum_delay", &self.minimum_delay)
            .field("retry", &self.retry)
            .field("on_renewed", &self.on_renewed.as_ref().map(|_| "<hook>"))
            .finish()
    }
}
