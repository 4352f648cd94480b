//! In-memory connections for unit tests

use crate::connection::{Connection, ConnectionFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    created: AtomicUsize,
    closed: AtomicUsize,
    failing: AtomicBool,
    /// Dials beyond this many successful ones are refused
    dial_budget: Mutex<Option<usize>>,
    dial_delay: Mutex<Option<Duration>>,
}

/// Factory handing out [`MockConnection`]s; clones share counters
#[derive(Clone, Default)]
pub(crate) struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Refuse every dial after `count` more have succeeded
    pub fn fail_after(&self, count: usize) {
        *self.state.dial_budget.lock() = Some(count);
    }

    /// Make each dial take `delay` before it completes
    pub fn set_dial_delay(&self, delay: Duration) {
        *self.state.dial_delay.lock() = Some(delay);
    }

    fn take_dial_budget(&self) -> bool {
        match self.state.dial_budget.lock().as_mut() {
            Some(0) => false,
            Some(budget) => {
                *budget -= 1;
                true
            }
            None => true,
        }
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn create(&self) -> io::Result<MockConnection> {
        let delay = *self.state.dial_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.state.failing.load(Ordering::SeqCst) || !self.take_dial_budget() {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock backend refused the dial",
            ));
        }
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            written: Vec::new(),
        })
    }
}

/// Reads never complete; writes are recorded
pub(crate) struct MockConnection {
    state: Arc<MockState>,
    pub written: Vec<u8>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        std::future::pending().await
    }

    async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Let spawned tasks run without advancing the clock
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
