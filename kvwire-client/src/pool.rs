//! # Connection Pool
//!
//! Purpose: Bound concurrent socket usage to a fixed number of slots and
//! reuse established connections across calls.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A fixed set of slots circulates between the
//!    queue and callers; a slot is either `Live` or `Empty` (not dialed yet).
//! 2. **Single Primitive**: The slot queue (mutex + condvar) is the only
//!    shared state; acquire and release are the only blocking points.
//! 3. **Lazy Start**: The queue is created on first use and filled with
//!    `Empty` placeholders by a helper thread, so the first caller does not
//!    wait for the fill.
//! 4. **RAII Release**: `PooledSlot` returns its slot on drop, on every exit
//!    path.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};

/// One unit of pool capacity.
enum Slot {
    /// Right to dial a new connection.
    Empty,
    /// A working connection.
    Live(Connection),
}

/// Bounded queue of slots shared by all callers.
struct SlotQueue {
    slots: Mutex<VecDeque<Slot>>,
    available: Condvar,
    capacity: usize,
}

impl SlotQueue {
    fn new(capacity: usize) -> Self {
        SlotQueue {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
        }
    }

    fn push(&self, slot: Slot) {
        let mut slots = self.slots.lock();
        debug_assert!(slots.len() < self.capacity, "more slots returned than issued");
        slots.push_back(slot);
        drop(slots);
        self.available.notify_one();
    }

    fn pop(&self) -> Slot {
        let mut slots = self.slots.lock();
        loop {
            if let Some(slot) = slots.pop_front() {
                return slot;
            }
            self.available.wait(&mut slots);
        }
    }

    fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Fixed-size connection pool.
pub struct ConnectionPool {
    size: usize,
    queue: OnceLock<Arc<SlotQueue>>,
}

impl ConnectionPool {
    /// Creates a pool with `size` slots. Nothing is allocated until the first
    /// `acquire`.
    pub fn new(size: usize) -> Self {
        ConnectionPool {
            size,
            queue: OnceLock::new(),
        }
    }

    /// Configured number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of slots currently waiting in the queue.
    pub fn idle(&self) -> usize {
        self.queue.get().map_or(0, |queue| queue.len())
    }

    /// Blocks until a slot is free and checks it out.
    ///
    /// **Output**: a `PooledSlot` that is either live or empty; an empty slot
    /// must be dialed by the caller before use.
    ///
    /// **Logic**:
    /// 1. Fail with `PoolNotConfigured` for a zero-sized pool.
    /// 2. Initialize the queue exactly once.
    /// 3. Pop the next slot, waiting on the condvar while none is queued.
    pub fn acquire(&self) -> ClientResult<PooledSlot<'_>> {
        if self.size == 0 {
            return Err(ClientError::PoolNotConfigured);
        }
        let queue = self.queue.get_or_init(|| start_queue(self.size));
        let conn = match queue.pop() {
            Slot::Live(conn) => Some(conn),
            Slot::Empty => None,
        };
        Ok(PooledSlot {
            queue: queue.as_ref(),
            conn,
        })
    }
}

fn start_queue(size: usize) -> Arc<SlotQueue> {
    let queue = Arc::new(SlotQueue::new(size));
    let filler = queue.clone();
    let spawned = thread::Builder::new()
        .name("kvwire-pool-fill".to_string())
        .spawn(move || {
            for _ in 0..size {
                filler.push(Slot::Empty);
            }
        });
    if let Err(err) = spawned {
        warn!(error = %err, "pool fill thread unavailable, filling inline");
        for _ in 0..size {
            queue.push(Slot::Empty);
        }
    }
    queue
}

/// RAII wrapper returning a slot to the pool on drop.
pub struct PooledSlot<'a> {
    queue: &'a SlotQueue,
    conn: Option<Connection>,
}

impl<'a> PooledSlot<'a> {
    /// True when the slot holds no connection yet.
    pub fn is_empty(&self) -> bool {
        self.conn.is_none()
    }

    /// Returns the live connection, dialing one with `dial` when the slot is
    /// empty. On dial failure the slot stays empty.
    pub fn get_or_dial<F>(&mut self, dial: F) -> ClientResult<&mut Connection>
    where
        F: FnOnce() -> ClientResult<Connection>,
    {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => dial()?,
        };
        Ok(self.conn.insert(conn))
    }

    /// Closes the connection so the slot goes back empty.
    pub fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = conn.close() {
                debug!(error = %err, "closing discarded connection failed");
            }
        }
    }

    /// Returns the slot to the pool now instead of at scope end.
    pub fn release(self) {}
}

impl Drop for PooledSlot<'_> {
    fn drop(&mut self) {
        let slot = match self.conn.take() {
            Some(conn) => Slot::Live(conn),
            None => Slot::Empty,
        };
        self.queue.push(slot);
    }
}
