//! FIFO queue of callers blocked on a saturated pool

use crate::connection::Connection;
use crate::errors::{PoolError, PoolResult};
use crate::pool::{PooledConnection, Reservation};

use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

/// What a waiter receives in its result slot
pub(crate) enum Grant<C: Connection> {
    /// A released connection, handed over without touching the idle set
    Connection(PooledConnection<C>),
    /// A freed capacity slot; the waiter dials its own connection
    Reservation(Reservation<C>),
    /// The waiter's deadline had already passed when the hand-off reached it
    Expired,
    /// The pool was closed
    Closed,
}

struct Waiter<C: Connection> {
    id: u64,
    deadline: Instant,
    sender: oneshot::Sender<Grant<C>>,
}

pub(crate) struct WaiterQueue<C: Connection> {
    waiters: VecDeque<Waiter<C>>,
    limit: usize,
    next_id: u64,
}

impl<C: Connection> WaiterQueue<C> {
    pub fn new(limit: usize) -> Self {
        Self {
            waiters: VecDeque::new(),
            limit,
            next_id: 0,
        }
    }

    /// Enqueue a new waiter, failing fast when the queue is full
    pub fn enroll(&mut self, deadline: Instant) -> PoolResult<(u64, oneshot::Receiver<Grant<C>>)> {
        if self.waiters.len() >= self.limit {
            // Callers that gave up on their acquire no longer count against the limit.
            self.waiters.retain(|waiter| !waiter.sender.is_closed());
            if self.waiters.len() >= self.limit {
                return Err(PoolError::Saturated);
            }
        }

        let (sender, receiver) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.waiters.push_back(Waiter {
            id,
            deadline,
            sender,
        });
        Ok((id, receiver))
    }

    /// Remove a waiter whose deadline fired. Returns false if it was already served.
    pub fn remove(&mut self, id: u64) -> bool {
        // Ids are handed out in queue order and removals keep it sorted.
        match self.waiters.binary_search_by_key(&id, |waiter| waiter.id) {
            Ok(index) => {
                self.waiters.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Offer `grant` to the oldest waiter still able to take it.
    ///
    /// Returns the grant when nobody accepted it.
    pub fn offer(&mut self, mut grant: Grant<C>) -> Option<Grant<C>> {
        let now = Instant::now();

        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.deadline <= now {
                trace!(waiter = waiter.id, "waiter deadline passed before hand-off");
                let _ = waiter.sender.send(Grant::Expired);
                continue;
            }

            match waiter.sender.send(grant) {
                Ok(()) => {
                    trace!(waiter = waiter.id, "handed off to waiter");
                    return None;
                }
                Err(returned) => {
                    trace!(waiter = waiter.id, "skipping cancelled waiter");
                    grant = returned;
                }
            }
        }

        Some(grant)
    }

    /// Fail every pending waiter with [`Grant::Closed`]
    pub fn close_all(&mut self) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.sender.send(Grant::Closed);
        }
        count
    }

    /// Queued waiters. Abandoned acquires count until the next prune or hand-off.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }
}
