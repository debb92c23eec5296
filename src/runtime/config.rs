use crate::delivery::sender::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::runtime::telemetry;
use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_POOL_WIDTH: usize = 10;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub const DEFAULT_BATCH_DIVISOR: usize = 10;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Runtime configuration for the dispatch engine.
///
/// All instances must be constructed via [`DispatchConfig::builder`] or [`DispatchConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    pool_width: usize,
    max_attempts: usize,
    retry_initial_backoff: Duration,
    retry_max_backoff: Duration,
    max_batch_size: usize,
    batch_divisor: usize,
    metrics_interval: Duration,
    event_capacity: usize,
}

pub struct DispatchConfigParams {
    pub pool_width: usize,
    pub max_attempts: usize,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
    pub max_batch_size: usize,
    pub batch_divisor: usize,
    pub metrics_interval: Duration,
    pub event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pool_width: DEFAULT_POOL_WIDTH,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_initial_backoff: Duration::ZERO,
            retry_max_backoff: Duration::ZERO,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_divisor: DEFAULT_BATCH_DIVISOR,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl DispatchConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: DispatchConfigParams) -> Result<Self> {
        let DispatchConfigParams {
            pool_width,
            max_attempts,
            retry_initial_backoff,
            retry_max_backoff,
            max_batch_size,
            batch_divisor,
            metrics_interval,
            event_capacity,
        } = params;

        let config = Self {
            pool_width,
            max_attempts,
            retry_initial_backoff,
            retry_max_backoff,
            max_batch_size,
            batch_divisor,
            metrics_interval,
            event_capacity,
        };

        config.validate()?;
        Ok(config)
    }

    /// Number of recipients sent concurrently within a batch.
    pub fn pool_width(&self) -> usize {
        self.pool_width
    }

    /// Total transport attempts per recipient, including the first.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn retry_initial_backoff(&self) -> Duration {
        self.retry_initial_backoff
    }

    pub fn retry_max_backoff(&self) -> Duration {
        self.retry_max_backoff
    }

    /// Upper bound on recipients fetched per page.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// A run is split into roughly this many pages before the cap applies.
    pub fn batch_divisor(&self) -> usize {
        self.batch_divisor
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Buffered events per subscriber before slow receivers start lagging.
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: self.retry_initial_backoff,
            max_backoff: self.retry_max_backoff,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.pool_width == 0 {
            bail!("pool_width must be greater than 0");
        }

        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if self.retry_max_backoff < self.retry_initial_backoff {
            bail!("retry_max_backoff must be at least retry_initial_backoff");
        }

        if self.max_batch_size == 0 {
            bail!("max_batch_size must be greater than 0");
        }

        if self.batch_divisor == 0 {
            bail!("batch_divisor must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.event_capacity == 0 {
            bail!("event_capacity must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DispatchConfigBuilder {
    pool_width: Option<usize>,
    max_attempts: Option<usize>,
    retry_initial_backoff: Option<Duration>,
    retry_max_backoff: Option<Duration>,
    max_batch_size: Option<usize>,
    batch_divisor: Option<usize>,
    metrics_interval: Option<Duration>,
    event_capacity: Option<usize>,
}

impl DispatchConfigBuilder {
    pub fn pool_width(mut self, width: usize) -> Self {
        self.pool_width = Some(width);
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = Some(backoff);
        self
    }

    pub fn retry_max_backoff(mut self, backoff: Duration) -> Self {
        self.retry_max_backoff = Some(backoff);
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn batch_divisor(mut self, divisor: usize) -> Self {
        self.batch_divisor = Some(divisor);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<DispatchConfig> {
        let defaults = DispatchConfig::default();
        let retry_initial_backoff = self
            .retry_initial_backoff
            .unwrap_or(defaults.retry_initial_backoff);
        let params = DispatchConfigParams {
            pool_width: self.pool_width.unwrap_or(defaults.pool_width),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            retry_initial_backoff,
            // an initial backoff alone implies a ceiling equal to it
            retry_max_backoff: self
                .retry_max_backoff
                .unwrap_or(retry_initial_backoff.max(defaults.retry_max_backoff)),
            max_batch_size: self.max_batch_size.unwrap_or(defaults.max_batch_size),
            batch_divisor: self.batch_divisor.unwrap_or(defaults.batch_divisor),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
            event_capacity: self.event_capacity.unwrap_or(defaults.event_capacity),
        };

        DispatchConfig::new(params)
    }
}
