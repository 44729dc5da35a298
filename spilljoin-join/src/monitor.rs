//! Hooks through which the caller observes and steers a running join.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use spilljoin_result::{Error, Result};

/// Receives progress and is asked for cancellation while a join runs.
pub trait ExecutionMonitor {
    /// `fraction` is the overall progress in `[0, 1]`.
    fn report_progress(&self, _fraction: f64, _message: &str) {}

    /// Return [`Error::Canceled`] to abort the join.
    fn check_canceled(&self) -> Result<()> {
        Ok(())
    }
}

/// Monitor that ignores progress and never cancels.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMonitor;

impl ExecutionMonitor for NoopMonitor {}

/// Shared flag that cancels every join it is attached to.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

impl ExecutionMonitor for CancellationToken {
    fn check_canceled(&self) -> Result<()> {
        if self.is_canceled() {
            Err(Error::Canceled)
        } else {
            Ok(())
        }
    }
}

impl<M: ExecutionMonitor + ?Sized> ExecutionMonitor for Arc<M> {
    fn report_progress(&self, fraction: f64, message: &str) {
        (**self).report_progress(fraction, message);
    }

    fn check_canceled(&self) -> Result<()> {
        (**self).check_canceled()
    }
}

/// Decides when the join has to move partitions out of memory.
///
/// Consulted before each row of the hash input is indexed, with the number of rows currently
/// held in memory. Returning `true` spills one partition.
pub trait MemoryMonitor {
    fn is_memory_low(&mut self, in_memory_rows: usize) -> bool;
}

impl<F: FnMut(usize) -> bool> MemoryMonitor for F {
    fn is_memory_low(&mut self, in_memory_rows: usize) -> bool {
        self(in_memory_rows)
    }
}

/// Memory is never low; the join stays in memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverLow;

impl MemoryMonitor for NeverLow {
    fn is_memory_low(&mut self, _in_memory_rows: usize) -> bool {
        false
    }
}

/// Memory is always low; every partition is spilled before the first row is indexed.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysLow;

impl MemoryMonitor for AlwaysLow {
    fn is_memory_low(&mut self, _in_memory_rows: usize) -> bool {
        true
    }
}

/// Memory is low once more than `max_rows` rows are indexed in memory.
#[derive(Clone, Copy, Debug)]
pub struct RowBudget {
    max_rows: usize,
}

impl RowBudget {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }
}

impl MemoryMonitor for RowBudget {
    fn is_memory_low(&mut self, in_memory_rows: usize) -> bool {
        in_memory_rows >= self.max_rows
    }
}

/// Maps the progress within one phase onto a slice of the overall progress.
pub(crate) struct PhaseProgress<'a> {
    monitor: &'a dyn ExecutionMonitor,
    start: f64,
    end: f64,
    message: &'static str,
}

impl<'a> PhaseProgress<'a> {
    pub(crate) fn new(
        monitor: &'a dyn ExecutionMonitor,
        start: f64,
        end: f64,
        message: &'static str,
    ) -> Self {
        Self {
            monitor,
            start,
            end,
            message,
        }
    }

    /// Report `done` out of `total` units of this phase.
    pub(crate) fn report(&self, done: u64, total: u64) {
        let within = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).min(1.0)
        };
        let fraction = self.start + (self.end - self.start) * within;
        self.monitor.report_progress(fraction, self.message);
    }

    pub(crate) fn check_canceled(&self) -> Result<()> {
        self.monitor.check_canceled()
    }
}

impl fmt::Debug for PhaseProgress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseProgress")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("message", &self.message)
            .finish()
    }
}
