//! Core connection pool implementation

use crate::config::PoolConfiguration;
use crate::connection::{Connection, ConnectionFactory};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{self, EvictionPolicy};
use crate::health::HealthStatus;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::waiter::{Grant, WaiterQueue};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{Notify, oneshot};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

/// A transport connection plus the bookkeeping the pool keeps for it
pub(crate) struct PoolEntry<C> {
    pub id: u64,
    pub conn: C,
    pub created_at: Instant,
    pub idle_since: Instant,
}

impl<C> PoolEntry<C> {
    pub(crate) fn new(id: u64, conn: C) -> Self {
        let now = Instant::now();
        Self {
            id,
            conn,
            created_at: now,
            idle_since: now,
        }
    }
}

pub(crate) struct PoolState<C: Connection> {
    /// Parked connections, most recently idled last
    idle: Vec<PoolEntry<C>>,
    /// Idle + checked out + reserved for an in-flight dial
    total: usize,
    waiters: WaiterQueue<C>,
    closed: bool,
}

/// State shared between the pool, its handles and the reaper
pub(crate) struct Shared<C: Connection> {
    state: Mutex<PoolState<C>>,
    pub(crate) config: PoolConfiguration,
    policy: EvictionPolicy,
    metrics: MetricsTracker,
    pub(crate) runtime: Handle,
    pub(crate) shutdown: Arc<Notify>,
    next_id: AtomicU64,
}

impl<C: Connection> Shared<C> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn checkout(self: &Arc<Self>, entry: PoolEntry<C>) -> PooledConnection<C> {
        PooledConnection::new(entry, Arc::clone(self))
    }

    /// Take a connection back from a caller
    fn release(self: &Arc<Self>, entry: PoolEntry<C>, reusable: bool) {
        self.metrics.record_released();
        let mut state = self.state.lock();

        if state.closed || !reusable {
            self.release_slot_locked(&mut state);
            drop(state);
            trace!(id = entry.id, reusable, "closing released connection");
            self.close_in_background(entry);
            return;
        }

        let id = entry.id;
        let conn = self.checkout(entry);
        match state.waiters.offer(Grant::Connection(conn)) {
            None => {
                self.metrics.record_handoff();
                trace!(id, "released connection handed to waiter");
            }
            Some(Grant::Connection(conn)) => {
                if let Some(mut entry) = conn.into_entry() {
                    entry.idle_since = Instant::now();
                    state.idle.push(entry);
                    trace!(id, idle = state.idle.len(), "connection parked");
                }
            }
            Some(_) => {}
        }
    }

    /// Give up one unit of counted capacity.
    ///
    /// A live waiter takes the slot over and dials for itself; otherwise the
    /// total shrinks.
    fn release_slot_locked(self: &Arc<Self>, state: &mut PoolState<C>) {
        let reservation = Reservation::new(Arc::clone(self));
        if let Some(Grant::Reservation(reservation)) =
            state.waiters.offer(Grant::Reservation(reservation))
        {
            reservation.disarm();
            state.total -= 1;
        }
    }

    fn release_slot(self: &Arc<Self>) {
        let mut state = self.state.lock();
        self.release_slot_locked(&mut state);
    }

    /// Remove expired idle connections. The caller closes them.
    pub(crate) fn evict_expired(self: &Arc<Self>, now: Instant) -> Vec<PoolEntry<C>> {
        let mut state = self.state.lock();
        if state.closed {
            return Vec::new();
        }

        let evicted = eviction::sweep(&mut state.idle, &self.policy, self.config.min_idle, now);
        for _ in &evicted {
            self.release_slot_locked(&mut state);
        }
        self.metrics.record_evicted(evicted.len());
        evicted
    }

    /// Close a connection without blocking the caller
    fn close_in_background(&self, mut entry: PoolEntry<C>) {
        self.runtime.spawn(async move {
            if let Err(err) = entry.conn.close().await {
                debug!(id = entry.id, error = %err, "error closing connection");
            }
        });
    }
}

/// A claim on one unit of capacity, held while a connection is being dialed.
///
/// Dropping it without [`disarm`](Reservation::disarm) gives the slot back,
/// so failed and cancelled dials never leak capacity.
pub(crate) struct Reservation<C: Connection> {
    shared: Option<Arc<Shared<C>>>,
}

impl<C: Connection> Reservation<C> {
    fn new(shared: Arc<Shared<C>>) -> Self {
        Self {
            shared: Some(shared),
        }
    }

    /// The slot now belongs to a connection (or has been accounted for)
    fn disarm(mut self) {
        self.shared = None;
    }
}

impl<C: Connection> Drop for Reservation<C> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release_slot();
        }
    }
}

/// A checked-out connection that returns to the pool when dropped
pub struct PooledConnection<C: Connection> {
    entry: Option<PoolEntry<C>>,
    shared: Arc<Shared<C>>,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
    reusable: bool,
}

impl<C: Connection> PooledConnection<C> {
    fn new(entry: PoolEntry<C>, shared: Arc<Shared<C>>) -> Self {
        let now = Instant::now();
        let read_deadline = shared.config.read_timeout.map(|timeout| now + timeout);
        let write_deadline = shared.config.write_timeout.map(|timeout| now + timeout);
        Self {
            entry: Some(entry),
            shared,
            read_deadline,
            write_deadline,
            reusable: true,
        }
    }

    fn entry(&self) -> &PoolEntry<C> {
        self.entry.as_ref().expect("Connection already released")
    }

    fn entry_mut(&mut self) -> &mut PoolEntry<C> {
        self.entry.as_mut().expect("Connection already released")
    }

    /// Pool-unique identity of this connection
    pub fn id(&self) -> u64 {
        self.entry().id
    }

    /// When the underlying connection was dialed
    pub fn created_at(&self) -> Instant {
        self.entry().created_at
    }

    /// Set both the read and write deadline. `None` removes them.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
        self.write_deadline = deadline;
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline;
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline;
    }

    /// Read from the connection, failing with `TimedOut` past the read deadline
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = self.read_deadline;
        with_deadline(deadline, "read", self.entry_mut().conn.read(buf)).await
    }

    /// Write to the connection, failing with `TimedOut` past the write deadline
    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let deadline = self.write_deadline;
        with_deadline(deadline, "write", self.entry_mut().conn.write(buf)).await
    }

    /// Close the connection on release instead of reusing it
    pub fn mark_broken(&mut self) {
        self.reusable = false;
    }

    /// Take the transport out of the pool for good, freeing its capacity slot
    pub fn detach(mut self) -> C {
        let entry = self.entry.take().expect("Connection already released");
        self.shared.release_slot();
        entry.conn
    }

    /// Strip the handle without releasing; used when a hand-off finds no taker
    fn into_entry(mut self) -> Option<PoolEntry<C>> {
        self.entry.take()
    }
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    operation: &'static str,
    io: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match deadline {
        Some(deadline) => timeout_at(deadline, io).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} deadline exceeded", operation),
            )
        })?,
        None => io.await,
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.entry().conn
    }
}

impl<C: Connection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry_mut().conn
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.shared.release(entry, self.reusable);
        }
    }
}

impl<C: Connection> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.entry.as_ref().map(|entry| entry.id))
            .field("reusable", &self.reusable)
            .finish()
    }
}

enum Checkout<C: Connection> {
    Ready(PoolEntry<C>),
    Replace(PoolEntry<C>, Reservation<C>),
    Create(Reservation<C>),
    Wait {
        id: u64,
        deadline: Instant,
        receiver: oneshot::Receiver<Grant<C>>,
    },
}

/// Bounded pool of connections to a single backend
///
/// Cloning is cheap; clones share the same pool.
///
/// # Examples
///
/// ```no_run
/// use esox_connpool::{Pool, PoolConfiguration, TcpConnectionFactory};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = TcpConnectionFactory::new("127.0.0.1:6379");
/// let config = PoolConfiguration::new()
///     .with_max_capacity(10)
///     .with_initial_idle(5);
/// let pool = Pool::new(factory, config).await?;
///
/// {
///     let mut conn = pool.acquire().await?;
///     conn.write(b"PING\r\n").await?;
///     // Connection returns to the pool when `conn` goes out of scope
/// }
///
/// assert_eq!(pool.idle_count(), 5);
/// pool.close();
/// # Ok(())
/// # }
/// ```
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<Shared<F::Connection>>,
    factory: Arc<F>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool, dialing the warm-up connections before returning.
    ///
    /// Must be called from within a tokio runtime; the idle reaper runs on it.
    pub async fn new(factory: F, config: PoolConfiguration) -> PoolResult<Self> {
        config.validate()?;

        let warmup = config.warmup_size();
        let mut idle = Vec::with_capacity(config.max_capacity);
        for _ in 0..warmup {
            match factory.create().await {
                Ok(conn) => idle.push(PoolEntry::new(idle.len() as u64, conn)),
                Err(err) => {
                    warn!(error = %err, created = idle.len(), "failed to warm up connection pool");
                    for mut entry in idle {
                        if let Err(err) = entry.conn.close().await {
                            debug!(id = entry.id, error = %err, "error closing warm-up connection");
                        }
                    }
                    return Err(PoolError::Dial(err));
                }
            }
        }

        let total = idle.len();
        let metrics = MetricsTracker::new();
        metrics.record_created(total);

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                idle,
                total,
                waiters: WaiterQueue::new(config.waiter_queue_limit),
                closed: false,
            }),
            policy: EvictionPolicy::from_config(&config),
            config,
            metrics,
            runtime: Handle::current(),
            shutdown: Arc::new(Notify::new()),
            next_id: AtomicU64::new(total as u64),
        });

        eviction::spawn_reaper(&shared);
        debug!(
            warm = total,
            max_capacity = shared.config.max_capacity,
            "connection pool started"
        );

        Ok(Self {
            shared,
            factory: Arc::new(factory),
        })
    }

    /// Get a connection, waiting up to the acquire timeout when the pool is at capacity
    pub async fn acquire(&self) -> PoolResult<PooledConnection<F::Connection>> {
        let conn = match self.begin_acquire()? {
            Checkout::Ready(entry) => {
                trace!(id = entry.id, "reusing idle connection");
                self.shared.checkout(entry)
            }
            Checkout::Replace(expired, reservation) => {
                trace!(id = expired.id, "replacing expired idle connection");
                self.shared.metrics.record_evicted(1);
                self.shared.close_in_background(expired);
                self.connect(reservation).await?
            }
            Checkout::Create(reservation) => self.connect(reservation).await?,
            Checkout::Wait {
                id,
                deadline,
                receiver,
            } => self.wait(id, deadline, receiver).await?,
        };

        self.shared.metrics.record_acquired();
        Ok(conn)
    }

    /// Decide under the lock how this acquire is served
    fn begin_acquire(&self) -> PoolResult<Checkout<F::Connection>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }

        if let Some(entry) = state.idle.pop() {
            if self.shared.policy.is_past_lifetime(&entry, Instant::now()) {
                // The expired connection's slot carries over to its replacement.
                let reservation = Reservation::new(Arc::clone(&self.shared));
                return Ok(Checkout::Replace(entry, reservation));
            }
            return Ok(Checkout::Ready(entry));
        }

        if state.total < self.shared.config.max_capacity {
            state.total += 1;
            return Ok(Checkout::Create(Reservation::new(Arc::clone(&self.shared))));
        }

        let deadline = Instant::now() + self.shared.config.acquire_timeout;
        match state.waiters.enroll(deadline) {
            Ok((id, receiver)) => {
                trace!(waiter = id, "pool at capacity, waiting");
                Ok(Checkout::Wait {
                    id,
                    deadline,
                    receiver,
                })
            }
            Err(err) => {
                self.shared.metrics.record_saturated();
                Err(err)
            }
        }
    }

    /// Dial a new connection into a reserved slot
    async fn connect(
        &self,
        reservation: Reservation<F::Connection>,
    ) -> PoolResult<PooledConnection<F::Connection>> {
        let conn = match self.factory.create().await {
            Ok(conn) => conn,
            Err(err) => {
                self.shared.metrics.record_dial_failure();
                warn!(error = %err, "failed to dial backend connection");
                return Err(PoolError::Dial(err));
            }
        };

        let entry = PoolEntry::new(self.shared.next_id(), conn);
        self.shared.metrics.record_created(1);
        trace!(id = entry.id, "dialed new connection");

        let mut state = self.shared.state.lock();
        if state.closed {
            state.total -= 1;
            reservation.disarm();
            drop(state);
            self.shared.close_in_background(entry);
            return Err(PoolError::Closed);
        }
        reservation.disarm();
        drop(state);

        Ok(self.shared.checkout(entry))
    }

    /// Block until a release, the deadline or close fulfills this waiter
    async fn wait(
        &self,
        id: u64,
        deadline: Instant,
        mut receiver: oneshot::Receiver<Grant<F::Connection>>,
    ) -> PoolResult<PooledConnection<F::Connection>> {
        let timeout = self.shared.config.acquire_timeout;

        let grant = match timeout_at(deadline, &mut receiver).await {
            Ok(Ok(grant)) => grant,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                if self.shared.state.lock().waiters.remove(id) {
                    self.shared.metrics.record_timeout();
                    trace!(waiter = id, "acquire timed out");
                    return Err(PoolError::AcquireTimeout(timeout));
                }
                // Already dequeued: the grant was sent under the lock we just held.
                match receiver.try_recv() {
                    Ok(grant) => grant,
                    Err(_) => return Err(PoolError::Closed),
                }
            }
        };

        match grant {
            Grant::Connection(conn) => Ok(conn),
            Grant::Reservation(reservation) => self.connect(reservation).await,
            Grant::Expired => {
                self.shared.metrics.record_timeout();
                Err(PoolError::AcquireTimeout(timeout))
            }
            Grant::Closed => Err(PoolError::Closed),
        }
    }

    /// Return a connection to the pool. Same as dropping it.
    pub fn release(&self, conn: PooledConnection<F::Connection>) {
        drop(conn);
    }

    /// Close the pool.
    ///
    /// Idle connections are closed, waiters fail with [`PoolError::Closed`], and
    /// checked-out connections are closed as they are released. Idempotent.
    pub fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let waiters = state.waiters.close_all();
            let idle = std::mem::take(&mut state.idle);
            state.total -= idle.len();
            (idle, waiters)
        };

        self.shared.shutdown.notify_one();
        debug!(idle = idle.len(), waiters, "connection pool closed");

        for entry in idle {
            self.shared.close_in_background(entry);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Get idle count
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Connections alive: idle, checked out, or being dialed
    pub fn total_count(&self) -> usize {
        self.shared.state.lock().total
    }

    pub fn checked_out_count(&self) -> usize {
        let state = self.shared.state.lock();
        state.total - state.idle.len()
    }

    pub fn waiter_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    pub fn config(&self) -> &PoolConfiguration {
        &self.shared.config
    }

    /// Get pool metrics
    pub fn get_metrics(&self) -> PoolMetrics {
        let (idle, checked_out, waiters) = {
            let state = self.shared.state.lock();
            (state.idle.len(), state.total - state.idle.len(), state.waiters.len())
        };
        self.shared
            .metrics
            .get_metrics(idle, checked_out, waiters, self.shared.config.max_capacity)
    }

    /// Export metrics
    pub fn export_metrics(&self) -> HashMap<String, String> {
        self.get_metrics().export()
    }

    /// Export metrics in Prometheus format
    #[cfg(feature = "metrics")]
    pub fn export_metrics_prometheus(
        &self,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        crate::metrics::MetricsExporter::export_prometheus(&self.get_metrics(), pool_name, tags)
    }

    /// Get health status
    pub fn get_health_status(&self) -> HealthStatus {
        let state = self.shared.state.lock();
        HealthStatus::new(
            state.idle.len(),
            state.total - state.idle.len(),
            state.waiters.len(),
            self.shared.config.max_capacity,
            state.closed,
        )
    }
}
