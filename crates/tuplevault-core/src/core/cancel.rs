// crates/tuplevault-core/src/core/cancel.rs
// ============================================================================
// Module: Cancellation
// Description: Cooperative cancellation flag with an optional deadline.
// Purpose: Let callers abort reads and writes between engine steps.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`CancellationToken`] is shared between a caller and the datastore.
//! Datastores check it before each statement and while streaming rows; a
//! fired token aborts the operation with [`DatastoreError::Canceled`] and,
//! inside a write transaction, rolls the backing transaction back.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use crate::interfaces::DatastoreError;

// ============================================================================
// SECTION: Token
// ============================================================================

/// Cancellation signal shared across clones.
///
/// # Invariants
/// - Once canceled (explicitly or by deadline), a token never resets.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    /// Explicit cancellation flag shared by clones.
    canceled: Arc<AtomicBool>,
    /// Optional deadline after which the token reports canceled.
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// Creates a token with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that fires at the given instant.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Creates a token that fires after the given duration.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Instant::now()
            .checked_add(timeout)
            .map_or_else(Self::new, Self::with_deadline)
    }

    /// Fires the token for every clone.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Returns true when the token was canceled or its deadline passed.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        if self.canceled.load(Ordering::SeqCst) {
            return true;
        }
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Fails with [`DatastoreError::Canceled`] when the token fired.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Canceled`] naming the interrupted operation.
    pub fn check(&self, operation: &str) -> Result<(), DatastoreError> {
        if self.canceled.load(Ordering::SeqCst) {
            return Err(DatastoreError::Canceled(format!("{operation}: canceled by caller")));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(DatastoreError::Canceled(format!("{operation}: deadline exceeded")));
        }
        Ok(())
    }
}
