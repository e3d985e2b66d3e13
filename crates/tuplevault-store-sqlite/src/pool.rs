// crates/tuplevault-store-sqlite/src/pool.rs
// ============================================================================
// Module: Connection Pool
// Description: One writer connection plus round-robin reader connections.
// Purpose: Serialize writes while letting snapshot reads proceed in parallel.
// Dependencies: rusqlite, tuplevault-core
// ============================================================================

//! ## Overview
//! Writes take the single writer connection; `SQLite` allows one writer at a
//! time, so the mutex mirrors the engine's own lock. Reads rotate across the
//! reader connections and fall back to the writer when none are configured
//! (caller-supplied connections, in-memory databases). Closing takes the
//! connections out of the pool; later calls fail with
//! [`DatastoreError::Closed`].
//!
//! The pool records which thread holds the writer. A read that would fall
//! back to the writer from that same thread (a snapshot read issued inside a
//! read-write transaction callback) fails with [`DatastoreError::Internal`]
//! instead of waiting on a lock it already holds. Other threads wait as usual.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::ThreadId;

use rusqlite::Connection;
use tuplevault_core::DatastoreError;

use crate::errors::poisoned;

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Connections held while the pool is open.
#[derive(Debug)]
pub(crate) struct PoolState {
    /// Connection used for migrations, seeding, and write transactions.
    pub(crate) writer: Mutex<Connection>,
    /// Connections used for snapshot reads.
    pub(crate) readers: Vec<Mutex<Connection>>,
}

/// Writer plus reader connections.
///
/// # Invariants
/// - `state` is `None` exactly when the pool has been closed.
#[derive(Debug)]
pub(crate) struct ConnectionPool {
    /// Open connections.
    state: RwLock<Option<PoolState>>,
    /// Round-robin reader cursor.
    cursor: AtomicUsize,
    /// Thread currently inside [`ConnectionPool::with_writer`].
    writer_thread: Mutex<Option<ThreadId>>,
}

/// Marks the writer as held by the current thread until dropped.
struct WriterHold<'a> {
    /// Holder slot of the owning pool.
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> WriterHold<'a> {
    /// Records the current thread as the writer holder.
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Result<Self, DatastoreError> {
        *slot.lock().map_err(|_| poisoned("writer holder"))? = Some(thread::current().id());
        Ok(Self {
            slot,
        })
    }
}

impl Drop for WriterHold<'_> {
    fn drop(&mut self) {
        if let Ok(mut holder) = self.slot.lock() {
            *holder = None;
        }
    }
}

impl ConnectionPool {
    /// Creates an open pool.
    pub(crate) fn new(writer: Connection, readers: Vec<Connection>) -> Self {
        Self {
            state: RwLock::new(Some(PoolState {
                writer: Mutex::new(writer),
                readers: readers.into_iter().map(Mutex::new).collect(),
            })),
            cursor: AtomicUsize::new(0),
            writer_thread: Mutex::new(None),
        }
    }

    /// Returns true when the calling thread holds the writer.
    fn writer_held_here(&self) -> Result<bool, DatastoreError> {
        let holder = self.writer_thread.lock().map_err(|_| poisoned("writer holder"))?;
        Ok(*holder == Some(thread::current().id()))
    }

    /// Runs `f` on the next reader connection.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Closed`] after close, an internal error on a
    /// poisoned lock or when the only connection is the writer held by this
    /// thread, or the error from `f`.
    pub(crate) fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatastoreError>,
    ) -> Result<T, DatastoreError> {
        let state = self.state.read().map_err(|_| poisoned("pool"))?;
        let Some(state) = state.as_ref() else {
            return Err(DatastoreError::Closed);
        };
        let connection = if state.readers.is_empty() {
            if self.writer_held_here()? {
                return Err(DatastoreError::Internal(
                    "connection is held by an open read-write transaction".to_string(),
                ));
            }
            &state.writer
        } else {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % state.readers.len();
            state.readers.get(index).unwrap_or(&state.writer)
        };
        let guard = connection.lock().map_err(|_| poisoned("read connection"))?;
        f(&guard)
    }

    /// Runs `f` with exclusive use of the writer connection.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Closed`] after close, an internal error on a
    /// poisoned lock, or the error from `f`.
    pub(crate) fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, DatastoreError>,
    ) -> Result<T, DatastoreError> {
        let state = self.state.read().map_err(|_| poisoned("pool"))?;
        let Some(state) = state.as_ref() else {
            return Err(DatastoreError::Closed);
        };
        let mut guard = state.writer.lock().map_err(|_| poisoned("write connection"))?;
        let _hold = WriterHold::enter(&self.writer_thread)?;
        f(&mut guard)
    }

    /// Removes the connections; `None` when already closed.
    ///
    /// # Errors
    ///
    /// Returns an internal error on a poisoned lock.
    pub(crate) fn take(&self) -> Result<Option<PoolState>, DatastoreError> {
        let mut state = self.state.write().map_err(|_| poisoned("pool"))?;
        Ok(state.take())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
