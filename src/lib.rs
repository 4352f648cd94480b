//! # esox_connpool
//!
//! Bounded, thread-safe pool of reusable network connections to a single
//! backend, built on tokio.
//!
//! ## Features
//!
//! - Hard cap on live connections (idle + checked out)
//! - Warm start: connections dialed eagerly before the pool is usable
//! - Most-recently-idled connection reused first
//! - FIFO waiters with a per-caller acquire timeout and a bounded waiter queue
//! - Released connections handed directly to the oldest waiter
//! - Background idle eviction with an optional idle floor and max lifetime
//! - Automatic return of connections via RAII (Drop trait)
//! - Metrics, Prometheus export and health status
//!
//! ## Quick Start
//!
//! ```no_run
//! use esox_connpool::{Pool, PoolConfiguration, TcpConnectionFactory};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), esox_connpool::PoolError> {
//! let pool = Pool::new(
//!     TcpConnectionFactory::new("127.0.0.1:11211"),
//!     PoolConfiguration::new().with_max_capacity(10).with_initial_idle(5),
//! )
//! .await?;
//!
//! {
//!     let conn = pool.acquire().await?;
//!     println!("Got connection {}", conn.id());
//!     // Connection automatically returned when `conn` goes out of scope
//! }
//!
//! pool.close();
//! # Ok(())
//! # }
//! ```

mod pool;
mod config;
mod connection;
mod metrics;
mod health;
mod eviction;
mod waiter;
mod errors;

#[cfg(test)]
mod testing;

pub use pool::{Pool, PooledConnection};
pub use config::PoolConfiguration;
pub use connection::{Connection, ConnectionFactory, TcpConnectionFactory};
pub use metrics::PoolMetrics;
#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
pub use health::HealthStatus;
pub use eviction::EvictionPolicy;
pub use errors::{PoolError, PoolResult};
