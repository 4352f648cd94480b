//! Idle eviction: expiry policy, idle sweep and the background reaper

use crate::config::PoolConfiguration;
use crate::connection::Connection;
use crate::pool::{PoolEntry, Shared};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, interval_at};
use tracing::{debug, trace};

/// Expiry policy for idle connections
///
/// # Examples
///
/// ```
/// use esox_connpool::{EvictionPolicy, PoolConfiguration};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_idle_timeout(Duration::from_secs(30))
///     .with_max_lifetime(Duration::from_secs(3600));
///
/// let policy = EvictionPolicy::from_config(&config);
/// assert_eq!(policy.idle_timeout(), Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Connections expire after sitting idle
    IdleTimeout(Duration),

    /// Connections expire after sitting idle or after reaching a maximum age
    Combined {
        max_lifetime: Duration,
        idle_timeout: Duration,
    },
}

impl EvictionPolicy {
    pub fn from_config(config: &PoolConfiguration) -> Self {
        match config.max_lifetime {
            Some(max_lifetime) => EvictionPolicy::Combined {
                max_lifetime,
                idle_timeout: config.idle_timeout,
            },
            None => EvictionPolicy::IdleTimeout(config.idle_timeout),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        match self {
            EvictionPolicy::IdleTimeout(timeout) => *timeout,
            EvictionPolicy::Combined { idle_timeout, .. } => *idle_timeout,
        }
    }

    pub(crate) fn is_expired<C>(&self, entry: &PoolEntry<C>, now: Instant) -> bool {
        let idle_for = now.saturating_duration_since(entry.idle_since);
        match self {
            EvictionPolicy::IdleTimeout(timeout) => idle_for >= *timeout,
            EvictionPolicy::Combined {
                max_lifetime,
                idle_timeout,
            } => {
                idle_for >= *idle_timeout
                    || now.saturating_duration_since(entry.created_at) >= *max_lifetime
            }
        }
    }

    /// Whether the connection has outlived its maximum age. Idle time is ignored;
    /// idle expiry is left to the reaper so the `min_idle` floor survives.
    pub(crate) fn is_past_lifetime<C>(&self, entry: &PoolEntry<C>, now: Instant) -> bool {
        match self {
            EvictionPolicy::IdleTimeout(_) => false,
            EvictionPolicy::Combined { max_lifetime, .. } => {
                now.saturating_duration_since(entry.created_at) >= *max_lifetime
            }
        }
    }
}

/// Remove expired entries from `idle`, oldest first, never going below `floor`.
///
/// `idle` is ordered by the time each entry was parked, so surviving entries
/// keep their relative order.
pub(crate) fn sweep<C>(
    idle: &mut Vec<PoolEntry<C>>,
    policy: &EvictionPolicy,
    floor: usize,
    now: Instant,
) -> Vec<PoolEntry<C>> {
    let mut remaining = idle.len();
    let mut kept = Vec::with_capacity(idle.len());
    let mut evicted = Vec::new();

    for entry in idle.drain(..) {
        if remaining > floor && policy.is_expired(&entry, now) {
            remaining -= 1;
            evicted.push(entry);
        } else {
            kept.push(entry);
        }
    }

    *idle = kept;
    evicted
}

/// Start the periodic idle sweep for a pool.
///
/// The task holds only a weak reference, so it ends on shutdown or once the
/// pool and all its handles are gone.
pub(crate) fn spawn_reaper<C: Connection>(shared: &Arc<Shared<C>>) {
    let pool = Arc::downgrade(shared);
    let shutdown = Arc::clone(&shared.shutdown);
    let period = shared.config.idle_scan_interval;

    shared.runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.notified() => break,
            }

            let Some(shared) = pool.upgrade() else {
                break;
            };
            let evicted = shared.evict_expired(Instant::now());
            drop(shared);

            if evicted.is_empty() {
                continue;
            }

            debug!(count = evicted.len(), "evicting idle connections");
            for mut entry in evicted {
                if let Err(err) = entry.conn.close().await {
                    debug!(id = entry.id, error = %err, "error closing evicted connection");
                }
            }
        }

        trace!("idle reaper stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, idle_since: Instant, created_at: Instant) -> PoolEntry<()> {
        PoolEntry {
            id,
            conn: (),
            created_at,
            idle_since,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_is_inclusive() {
        let start = Instant::now();
        let policy = EvictionPolicy::IdleTimeout(Duration::from_secs(1));
        let parked = entry(0, start, start);

        assert!(!policy.is_expired(&parked, start + Duration::from_millis(999)));
        assert!(policy.is_expired(&parked, start + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_expires_recently_used_connections() {
        let start = Instant::now();
        let policy = EvictionPolicy::Combined {
            max_lifetime: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        };
        let parked = entry(0, start + Duration::from_secs(9), start);

        assert!(policy.is_expired(&parked, start + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_check_ignores_idle_time() {
        let start = Instant::now();
        let idle_only = EvictionPolicy::IdleTimeout(Duration::from_secs(1));
        let combined = EvictionPolicy::Combined {
            max_lifetime: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(1),
        };
        let parked = entry(0, start, start);

        assert!(!idle_only.is_past_lifetime(&parked, start + Duration::from_secs(60)));
        assert!(!combined.is_past_lifetime(&parked, start + Duration::from_secs(5)));
        assert!(combined.is_past_lifetime(&parked, start + Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_oldest_and_keeps_order() {
        let start = Instant::now();
        let policy = EvictionPolicy::IdleTimeout(Duration::from_secs(5));
        let mut idle = vec![
            entry(1, start, start),
            entry(2, start + Duration::from_secs(1), start),
            entry(3, start + Duration::from_secs(8), start),
            entry(4, start + Duration::from_secs(9), start),
        ];

        let evicted = sweep(&mut idle, &policy, 0, start + Duration::from_secs(10));

        let evicted_ids: Vec<u64> = evicted.iter().map(|e| e.id).collect();
        let kept_ids: Vec<u64> = idle.iter().map(|e| e.id).collect();
        assert_eq!(evicted_ids, vec![1, 2]);
        assert_eq!(kept_ids, vec![3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_preserves_floor() {
        let start = Instant::now();
        let policy = EvictionPolicy::IdleTimeout(Duration::from_secs(1));
        let mut idle: Vec<_> = (0..5).map(|id| entry(id, start, start)).collect();

        let evicted = sweep(&mut idle, &policy, 2, start + Duration::from_secs(2));

        assert_eq!(evicted.len(), 3);
        assert_eq!(idle.len(), 2);
    }
}
