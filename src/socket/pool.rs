//! Bounded slot container for one destination.
//!
//! The container starts with `maxsize` empty placeholders. Taking an entry out is
//! admission: a live handle is reused, a placeholder means "open a new one".
//! Every checked-out entry goes back exactly once, either as the live handle
//! (release) or as a placeholder (discard), so checked-out entries never exceed `maxsize`.

use crate::base::error::PoolError;
use crate::socket::client::Connection;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// LIFO container of idle handles and placeholders.
pub struct SlotPool<T> {
    label: String,
    maxsize: usize,
    block: bool,
    slots: Mutex<VecDeque<Option<T>>>,
    available: Notify,
}

impl<T> std::fmt::Debug for SlotPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPool")
            .field("label", &self.label)
            .field("maxsize", &self.maxsize)
            .field("block", &self.block)
            .field("available", &self.available())
            .finish()
    }
}

impl<T> SlotPool<T> {
    /// `maxsize` is raised to 1 if zero.
    pub fn new(label: impl Into<String>, maxsize: usize, block: bool) -> Self {
        let maxsize = maxsize.max(1);
        let slots = (0..maxsize).map(|_| None).collect();
        Self { label: label.into(), maxsize, block, slots: Mutex::new(slots), available: Notify::new() }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Option<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    pub fn is_blocking(&self) -> bool {
        self.block
    }

    /// Entries (handles and placeholders) ready to hand out.
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    /// Live handles sitting idle.
    pub fn idle_count(&self) -> usize {
        self.lock().iter().filter(|e| e.is_some()).count()
    }

    pub fn checked_out(&self) -> usize {
        self.maxsize.saturating_sub(self.available())
    }

    /// Take the most recently returned entry without waiting.
    pub fn try_acquire(&self) -> Result<Option<T>, PoolError> {
        self.lock().pop_back().ok_or_else(|| PoolError::PoolFull { pool: self.label.clone() })
    }

    /// Take the most recently returned entry.
    ///
    /// In blocking mode waits up to `timeout` (forever when `None`) for an entry and
    /// fails with [`PoolError::PoolTimeout`]. Otherwise fails at once with
    /// [`PoolError::PoolFull`].
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<Option<T>, PoolError> {
        if !self.block {
            return self.try_acquire();
        }
        let wait = async {
            loop {
                let notified = self.available.notified();
                tokio::pin!(notified);
                // Register before checking so a release in between is not missed.
                notified.as_mut().enable();
                if let Some(entry) = self.lock().pop_back() {
                    return entry;
                }
                notified.await;
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| PoolError::PoolTimeout { pool: self.label.clone() }),
            None => Ok(wait.await),
        }
    }

    /// Return an entry. A live handle is handed back when the container is already full.
    pub fn put(&self, entry: Option<T>) -> Result<(), T> {
        {
            let mut slots = self.lock();
            if slots.len() >= self.maxsize {
                return match entry {
                    Some(handle) => Err(handle),
                    None => Ok(()),
                };
            }
            slots.push_back(entry);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Take every idle handle out, leaving placeholders so capacity is unchanged.
    pub fn drain(&self) -> Vec<T> {
        let mut slots = self.lock();
        slots.iter_mut().filter_map(Option::take).collect()
    }
}

/// A checked-out connection bound to its slot.
///
/// Dropping it without [`release`](Self::release) or [`discard`](Self::discard)
/// frees the slot and closes the connection.
pub struct PooledConn<C: Connection> {
    conn: C,
    lease: Lease<C>,
}

impl<C: Connection> PooledConn<C> {
    pub(crate) fn new(conn: C, slots: Arc<SlotPool<C>>, pooled: bool) -> Self {
        Self { conn, lease: Lease { slots, pooled, settled: false } }
    }

    /// Whether the handle occupies one of the pool's slots.
    pub fn is_pooled(&self) -> bool {
        self.lease.pooled
    }

    /// Put the handle back for reuse.
    pub fn release(self) {
        let PooledConn { conn, lease } = self;
        lease.settle(Some(conn));
    }

    /// Close the handle and free its slot.
    pub fn discard(self) {
        let PooledConn { mut conn, lease } = self;
        conn.close();
        lease.settle(None);
    }
}

impl<C: Connection> Deref for PooledConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: Connection> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

/// Slot bookkeeping for a [`PooledConn`]. Unpooled leases come from the
/// non-blocking overflow path and own no slot.
struct Lease<C: Connection> {
    slots: Arc<SlotPool<C>>,
    pooled: bool,
    settled: bool,
}

impl<C: Connection> Lease<C> {
    fn settle(mut self, conn: Option<C>) {
        self.settled = true;
        if conn.is_none() && !self.pooled {
            return;
        }
        if let Err(mut rejected) = self.slots.put(conn) {
            tracing::warn!(
                pool = %self.slots.label,
                pool_size = self.slots.maxsize,
                "connection pool is full, discarding connection"
            );
            rejected.close();
        }
    }
}

impl<C: Connection> Drop for Lease<C> {
    fn drop(&mut self) {
        if !self.settled && self.pooled {
            let _ = self.slots.put(None);
        }
    }
}
