//! Executor module for filtered, projected scans.
//!
//! This module provides the row cursor, which drains a batch source one
//! matching row at a time, and the vectorized kernels it is built on:
//! projection, predicate evaluation and selection buffer management.

mod cursor;
pub mod vectorized;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use self::vectorized::DEFAULT_BATCH_SIZE;

pub use cursor::{CursorState, RowCursor, Rows, ScanOptions};

/// Configuration for a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Expected rows per batch; sizes the initial selection buffer.
    pub batch_size: usize,
    /// Memory limit in bytes for a single selection buffer (0 = unlimited).
    pub memory_limit: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            memory_limit: 0,
        }
    }
}

impl ScanConfig {
    /// Creates a new scan configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size hint.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the memory limit in bytes.
    #[must_use]
    pub fn with_memory_limit(mut self, memory_limit: usize) -> Self {
        self.memory_limit = memory_limit;
        self
    }
}

/// Pull-based enumeration protocol shared by cursors.
///
/// `move_next` positions on the next item and reports whether one exists;
/// `current` reads the item at that position.
pub trait Enumerator {
    /// Item produced at each position.
    type Item;

    /// Returns the item at the current position.
    ///
    /// # Errors
    ///
    /// Returns `State` when not positioned on an item.
    fn current(&self) -> Result<Self::Item>;

    /// Advances to the next item, returning `false` when exhausted.
    ///
    /// # Errors
    ///
    /// Returns any error raised while producing the next item.
    fn move_next(&mut self) -> Result<bool>;

    /// Restarts enumeration from the beginning.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` if the enumerator cannot restart.
    fn reset(&mut self) -> Result<()>;

    /// Releases held resources. Idempotent.
    fn close(&mut self);
}
