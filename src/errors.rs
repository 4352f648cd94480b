//! Error types for the connection pool

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Invalid pool configuration: {0}")]
    Config(String),

    #[error("Failed to dial backend connection: {0}")]
    Dial(#[source] std::io::Error),

    #[error("Pool is saturated - waiter queue is full")]
    Saturated,

    #[error("Timed out waiting for a connection after {0:?}")]
    AcquireTimeout(Duration),

    #[error("Pool is closed")]
    Closed,
}

pub type PoolResult<T> = Result<T, PoolError>;
