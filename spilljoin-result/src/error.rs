use std::io;
use thiserror::Error;

/// Unified error type for all spilljoin operations.
///
/// # Error Handling Strategy
///
/// Configuration problems surface while settings and specifications are built, before any row is
/// processed. Execution failures (spill I/O, cancellation) abort the running join; the partition
/// manager releases its spill files on the unwind path and the error is returned to the caller.
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`, so a join can run on a worker thread and hand its error
/// back to the thread that owns the result.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during spill file operations.
    ///
    /// This error wraps standard library I/O errors and typically occurs during:
    /// - Creating a spill file in the temporary directory
    /// - Appending condensed rows to a disk bucket
    /// - Reading a closed bucket back in the disk-join phase
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error while encoding or decoding spilled rows.
    ///
    /// Disk buckets persist rows as Arrow IPC streams, so schema mismatches or cells that do not
    /// fit the declared column type end up here.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid join configuration or API parameter.
    ///
    /// Raised synchronously when building table settings or a join specification:
    /// - Unknown join or include column names
    /// - Settings declared for the wrong side
    /// - Different numbers of join clauses on the two sides
    /// - A row key policy that cannot produce unique keys for the requested outputs
    /// - Zero-valued execution options
    ///
    /// # Recovery
    ///
    /// Fix the configuration and build again. These errors are never retried internally.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// The join was canceled through its execution monitor.
    ///
    /// Cancellation is a normal termination path: the join stops at the next row or bucket pair,
    /// closes every open disk bucket, and returns this variant.
    #[error("Execution canceled")]
    Canceled,

    /// Internal error indicating a bug or unexpected state.
    ///
    /// This error should never occur during normal operation. It indicates:
    /// - A phase transition out of order
    /// - A disk bucket used after it was consumed
    /// - A partition slot in an unexpected state
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is the cooperative cancellation signal rather than a failure.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }
}
