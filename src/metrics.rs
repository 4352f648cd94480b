//! Metrics collection and export for connection pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "metrics")]
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use tracing::warn;

/// Metrics data for a pool
///
/// # Examples
///
/// ```
/// use esox_connpool::{Pool, PoolConfiguration, TcpConnectionFactory};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let factory = TcpConnectionFactory::new("127.0.0.1:6379");
/// let pool = Pool::new(factory, PoolConfiguration::new().with_max_capacity(4))
///     .await
///     .unwrap();
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_acquired, 0);
/// assert_eq!(metrics.max_capacity, 4);
/// # }
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Successful acquires
    pub total_acquired: usize,

    /// Handles returned to the pool, reusable or not
    pub total_released: usize,

    /// Connections produced by the factory
    pub connections_created: usize,

    /// Factory failures
    pub dial_failures: usize,

    /// Acquires that gave up waiting
    pub acquire_timeouts: usize,

    /// Acquires rejected because the waiter queue was full
    pub saturated_rejections: usize,

    /// Connections closed by expiry
    pub evicted: usize,

    /// Releases handed straight to a waiter
    pub handoffs: usize,

    /// Current idle connections
    pub idle_connections: usize,

    /// Current checked-out connections
    pub checked_out_connections: usize,

    /// Callers currently waiting
    pub waiting_callers: usize,

    /// Pool utilization ratio (0.0 to 1.0)
    pub utilization: f64,

    /// Maximum pool capacity
    pub max_capacity: usize,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("connections_created".to_string(), self.connections_created.to_string());
        metrics.insert("dial_failures".to_string(), self.dial_failures.to_string());
        metrics.insert("acquire_timeouts".to_string(), self.acquire_timeouts.to_string());
        metrics.insert("saturated_rejections".to_string(), self.saturated_rejections.to_string());
        metrics.insert("evicted".to_string(), self.evicted.to_string());
        metrics.insert("handoffs".to_string(), self.handoffs.to_string());
        metrics.insert("idle_connections".to_string(), self.idle_connections.to_string());
        metrics.insert("checked_out_connections".to_string(), self.checked_out_connections.to_string());
        metrics.insert("waiting_callers".to_string(), self.waiting_callers.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("max_capacity".to_string(), self.max_capacity.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
#[cfg(feature = "metrics")]
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// Every series carries a `pool` label plus any extra `tags`.
    ///
    /// # Examples
    ///
    /// ```
    /// use esox_connpool::{MetricsExporter, PoolMetrics};
    /// use std::collections::HashMap;
    ///
    /// let metrics = PoolMetrics {
    ///     total_acquired: 12,
    ///     total_released: 10,
    ///     connections_created: 4,
    ///     dial_failures: 0,
    ///     acquire_timeouts: 1,
    ///     saturated_rejections: 0,
    ///     evicted: 2,
    ///     handoffs: 3,
    ///     idle_connections: 2,
    ///     checked_out_connections: 2,
    ///     waiting_callers: 0,
    ///     utilization: 0.5,
    ///     max_capacity: 4,
    /// };
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&metrics, "backend", Some(&tags));
    /// assert!(output.contains("connpool_connections_idle"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let registry = Registry::new();
        let labels = Self::labels(pool_name, tags);
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let gauges = [
            ("connpool_connections_idle", "Current idle connections", metrics.idle_connections),
            ("connpool_connections_checked_out", "Current checked-out connections", metrics.checked_out_connections),
            ("connpool_waiters", "Callers waiting for a connection", metrics.waiting_callers),
            ("connpool_max_capacity", "Maximum live connections", metrics.max_capacity),
        ];
        for (name, help, value) in gauges {
            match IntGauge::with_opts(opts(name, help)) {
                Ok(gauge) => {
                    gauge.set(value as i64);
                    if let Err(err) = registry.register(Box::new(gauge)) {
                        warn!(metric = name, error = %err, "failed to register metric");
                    }
                }
                Err(err) => warn!(metric = name, error = %err, "invalid metric"),
            }
        }

        match Gauge::with_opts(opts("connpool_utilization", "Pool utilization ratio")) {
            Ok(gauge) => {
                gauge.set(metrics.utilization);
                if let Err(err) = registry.register(Box::new(gauge)) {
                    warn!(error = %err, "failed to register utilization metric");
                }
            }
            Err(err) => warn!(error = %err, "invalid utilization metric"),
        }

        let counters = [
            ("connpool_acquired_total", "Successful acquires", metrics.total_acquired),
            ("connpool_released_total", "Connections returned", metrics.total_released),
            ("connpool_created_total", "Connections dialed", metrics.connections_created),
            ("connpool_dial_failures_total", "Failed dials", metrics.dial_failures),
            ("connpool_acquire_timeouts_total", "Acquires that timed out", metrics.acquire_timeouts),
            ("connpool_saturated_total", "Acquires rejected by a full waiter queue", metrics.saturated_rejections),
            ("connpool_evicted_total", "Connections evicted by expiry", metrics.evicted),
            ("connpool_handoffs_total", "Releases handed directly to a waiter", metrics.handoffs),
        ];
        for (name, help, value) in counters {
            match IntCounter::with_opts(opts(name, help)) {
                Ok(counter) => {
                    counter.inc_by(value as u64);
                    if let Err(err) = registry.register(Box::new(counter)) {
                        warn!(metric = name, error = %err, "failed to register metric");
                    }
                }
                Err(err) => warn!(metric = name, error = %err, "invalid metric"),
            }
        }

        let mut buffer = Vec::new();
        if let Err(err) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
            warn!(error = %err, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    fn labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());

        if let Some(tags) = tags {
            for (key, value) in tags {
                labels.insert(key.clone(), value.clone());
            }
        }

        labels
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    acquired: AtomicUsize,
    released: AtomicUsize,
    created: AtomicUsize,
    dial_failures: AtomicUsize,
    timeouts: AtomicUsize,
    saturated: AtomicUsize,
    evicted: AtomicUsize,
    handoffs: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self, count: usize) {
        self.created.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saturated(&self) {
        self.saturated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_handoff(&self) {
        self.handoffs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(
        &self,
        idle: usize,
        checked_out: usize,
        waiters: usize,
        capacity: usize,
    ) -> PoolMetrics {
        let utilization = if capacity > 0 {
            checked_out as f64 / capacity as f64
        } else {
            0.0
        };

        PoolMetrics {
            total_acquired: self.acquired.load(Ordering::Relaxed),
            total_released: self.released.load(Ordering::Relaxed),
            connections_created: self.created.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            acquire_timeouts: self.timeouts.load(Ordering::Relaxed),
            saturated_rejections: self.saturated.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            idle_connections: idle,
            checked_out_connections: checked_out,
            waiting_callers: waiters,
            utilization,
            max_capacity: capacity,
        }
    }
}
