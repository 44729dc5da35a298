//! Tuning knobs of the hybrid hash join.

use std::path::{Path, PathBuf};

use spilljoin_result::{Error, Result};

/// Options controlling join execution. None of them change the join result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HybridHashJoinOptions {
    /// Number of hash partitions. Derived from `max_open_files` when unset.
    pub num_partitions: Option<usize>,
    /// Upper bound on spill files open at once; each on-disk partition needs two.
    pub max_open_files: usize,
    /// Rows buffered per Arrow batch when writing spill files.
    pub spill_batch_rows: usize,
    /// Rows of a spilled hash partition indexed at once when joining partitions from disk.
    pub block_rows: usize,
    /// Directory for spill files. The system temp directory when unset.
    pub spill_dir: Option<PathBuf>,
}

impl Default for HybridHashJoinOptions {
    fn default() -> Self {
        Self {
            num_partitions: None,
            max_open_files: 1024,
            spill_batch_rows: 1024,
            block_rows: 100_000,
            spill_dir: None,
        }
    }
}

impl HybridHashJoinOptions {
    /// Set the number of partitions explicitly.
    pub fn with_num_partitions(mut self, num_partitions: usize) -> Self {
        self.num_partitions = Some(num_partitions);
        self
    }

    pub fn with_max_open_files(mut self, max_open_files: usize) -> Self {
        self.max_open_files = max_open_files;
        self
    }

    pub fn with_spill_batch_rows(mut self, rows: usize) -> Self {
        self.spill_batch_rows = rows;
        self
    }

    pub fn with_block_rows(mut self, rows: usize) -> Self {
        self.block_rows = rows;
        self
    }

    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    /// Partition count used by a join: the explicit count, else half the open file budget.
    pub fn effective_num_partitions(&self) -> usize {
        self.num_partitions
            .unwrap_or_else(|| (self.max_open_files / 2).max(1))
    }

    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill_dir.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        validate_join_options(self)
    }
}

/// Validate join options before execution.
pub fn validate_join_options(options: &HybridHashJoinOptions) -> Result<()> {
    if options.num_partitions == Some(0) {
        return Err(Error::InvalidArgumentError(
            "join num_partitions must be > 0".to_string(),
        ));
    }
    if options.max_open_files == 0 {
        return Err(Error::InvalidArgumentError(
            "join max_open_files must be > 0".to_string(),
        ));
    }
    if options.spill_batch_rows == 0 {
        return Err(Error::InvalidArgumentError(
            "join spill_batch_rows must be > 0".to_string(),
        ));
    }
    if options.block_rows == 0 {
        return Err(Error::InvalidArgumentError(
            "join block_rows must be > 0".to_string(),
        ));
    }
    if let Some(dir) = &options.spill_dir
        && !dir.is_dir()
    {
        return Err(Error::InvalidArgumentError(format!(
            "join spill_dir {} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}
