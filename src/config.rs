//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Configuration for connection pool behavior
///
/// # Examples
///
/// ```
/// use esox_connpool::PoolConfiguration;
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_capacity(10)
///     .with_initial_idle(5)
///     .with_idle_timeout(Duration::from_secs(60))
///     .with_acquire_timeout(Duration::from_secs(2));
///
/// assert_eq!(config.max_capacity, 10);
/// assert_eq!(config.initial_idle, 5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Maximum number of connections alive at once (idle + checked out)
    pub max_capacity: usize,

    /// Idle floor the reaper never evicts below
    pub min_idle: usize,

    /// Connections created eagerly before the pool is usable
    pub initial_idle: usize,

    /// How long a connection may sit idle before it is evicted
    pub idle_timeout: Duration,

    /// How often the reaper scans the idle set
    pub idle_scan_interval: Duration,

    /// Maximum age of a connection regardless of activity
    pub max_lifetime: Option<Duration>,

    /// Maximum time a caller blocks waiting for a connection
    pub acquire_timeout: Duration,

    /// Maximum number of callers queued while the pool is at capacity
    pub waiter_queue_limit: usize,

    /// Read deadline applied to every handle handed out
    pub read_timeout: Option<Duration>,

    /// Write deadline applied to every handle handed out
    pub write_timeout: Option<Duration>,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);

        Self {
            max_capacity: 10 * cpus,
            min_idle: 0,
            initial_idle: 0,
            idle_timeout: Duration::from_secs(5 * 60),
            idle_scan_interval: Duration::from_secs(60),
            max_lifetime: None,
            acquire_timeout: Duration::from_secs(3),
            waiter_queue_limit: 10_000,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of live connections
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::PoolConfiguration;
    ///
    /// let config = PoolConfiguration::new().with_max_capacity(50);
    ///
    /// assert_eq!(config.max_capacity, 50);
    /// ```
    pub fn with_max_capacity(mut self, capacity: usize) -> Self {
        self.max_capacity = capacity;
        self
    }

    /// Set the idle floor preserved by the reaper
    pub fn with_min_idle(mut self, count: usize) -> Self {
        self.min_idle = count;
        self
    }

    /// Set the number of connections created at construction
    pub fn with_initial_idle(mut self, count: usize) -> Self {
        self.initial_idle = count;
        self
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the reaper scan interval
    pub fn with_idle_scan_interval(mut self, interval: Duration) -> Self {
        self.idle_scan_interval = interval;
        self
    }

    /// Set the maximum connection lifetime
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Set how long `acquire` waits when the pool is at capacity
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the waiter queue bound
    pub fn with_waiter_queue_limit(mut self, limit: usize) -> Self {
        self.waiter_queue_limit = limit;
        self
    }

    /// Set read and write timeouts applied on every checkout
    pub fn with_io_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = Some(read);
        self.write_timeout = Some(write);
        self
    }

    /// Check the configuration for values the pool cannot run with
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::{PoolConfiguration, PoolError};
    ///
    /// let config = PoolConfiguration::new()
    ///     .with_max_capacity(2)
    ///     .with_initial_idle(3);
    ///
    /// assert!(matches!(config.validate(), Err(PoolError::Config(_))));
    /// ```
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_capacity == 0 {
            return Err(PoolError::Config(
                "max_capacity must be greater than zero".to_string(),
            ));
        }
        if self.initial_idle > self.max_capacity {
            return Err(PoolError::Config(format!(
                "initial_idle ({}) exceeds max_capacity ({})",
                self.initial_idle, self.max_capacity
            )));
        }
        if self.min_idle > self.max_capacity {
            return Err(PoolError::Config(format!(
                "min_idle ({}) exceeds max_capacity ({})",
                self.min_idle, self.max_capacity
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(PoolError::Config(
                "idle_timeout must be greater than zero".to_string(),
            ));
        }
        if self.idle_scan_interval.is_zero() {
            return Err(PoolError::Config(
                "idle_scan_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of connections to open before the pool accepts callers
    pub(crate) fn warmup_size(&self) -> usize {
        self.initial_idle.max(self.min_idle)
    }
}
