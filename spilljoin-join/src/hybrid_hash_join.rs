//! Hybrid hash join.
//!
//! The smaller input (the hash input) is indexed in memory, split into partitions by the hash
//! of the join values. When memory runs low, partitions move to disk one at a time. The larger
//! input (the probe input) is then streamed: rows of in-memory partitions are joined at once,
//! rows of spilled partitions are written to disk next to the spilled hash rows. Finally each
//! spilled partition is joined from disk.
//!
//! ```text
//! phase 1  hash input  ──► [ p0 | p1 | p2 | p3 ]   p0, p1 spilled under memory pressure
//!                            disk  disk  mem   mem
//! phase 2  probe input ──► p2, p3 probed in memory; rows of p0, p1 appended to probe buckets
//! phase 3  p0: hash bucket ⋈ probe bucket, then p1
//! ```
//!
//! Rows are read in a condensed layout that holds only the columns the output needs, plus the
//! row's offset in its input when the output order or a disjunctive predicate requires it.

use std::fmt;
use std::sync::Arc;

use spilljoin_result::{Error, Result};
use spilljoin_table::DataTable;

use crate::block_join::join_disk_partition;
use crate::container::JoinContainer;
use crate::monitor::{ExecutionMonitor, MemoryMonitor, NeverLow, NoopMonitor, PhaseProgress};
use crate::options::HybridHashJoinOptions;
use crate::partitions::PartitionManager;
use crate::result::{JoinResult, JoinStats};
use crate::settings::InputTable;
use crate::specification::{JoinSpecification, OutputRowOrder};
use crate::tuple::JoinTuple;

/// Execution state of a [`HybridHashJoin`]. Phases only advance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JoinPhase {
    Init,
    /// Indexing the hash input, spilling partitions under memory pressure.
    IndexHash,
    /// Probing in-memory partitions and spilling probe rows of on-disk partitions.
    ProbeAndSpill,
    /// Joining the spilled partitions.
    JoinDiskPairs,
    Done,
}

impl fmt::Display for JoinPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinPhase::Init => write!(f, "init"),
            JoinPhase::IndexHash => write!(f, "index hash input"),
            JoinPhase::ProbeAndSpill => write!(f, "probe and spill"),
            JoinPhase::JoinDiskPairs => write!(f, "join disk partitions"),
            JoinPhase::Done => write!(f, "done"),
        }
    }
}

/// A single join of the two tables bound to a [`JoinSpecification`].
pub struct HybridHashJoin {
    spec: Arc<JoinSpecification>,
    options: HybridHashJoinOptions,
    memory: Box<dyn MemoryMonitor>,
    monitor: Box<dyn ExecutionMonitor>,
    phase: JoinPhase,
}

impl HybridHashJoin {
    /// Prepare a join. Both settings of `spec` must be bound to their tables.
    pub fn try_new(spec: JoinSpecification, options: HybridHashJoinOptions) -> Result<Self> {
        options.validate()?;
        for side in InputTable::BOTH {
            if spec.settings(side).table().is_none() {
                return Err(Error::InvalidArgumentError(format!(
                    "the {side} join table settings are not bound to a table"
                )));
            }
        }
        Ok(Self {
            spec: Arc::new(spec),
            options,
            memory: Box::new(NeverLow),
            monitor: Box::new(NoopMonitor),
            phase: JoinPhase::Init,
        })
    }

    /// Decide when partitions are spilled. By default everything stays in memory.
    pub fn with_memory_monitor(mut self, memory: impl MemoryMonitor + 'static) -> Self {
        self.memory = Box::new(memory);
        self
    }

    pub fn with_execution_monitor(mut self, monitor: impl ExecutionMonitor + 'static) -> Self {
        self.monitor = Box::new(monitor);
        self
    }

    pub fn spec(&self) -> &JoinSpecification {
        &self.spec
    }

    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    /// Run the join.
    ///
    /// On error, including cancellation, all spill files are closed and removed before the
    /// error is returned.
    pub fn join(mut self) -> Result<JoinResult> {
        if !self.spec.retains_anything() {
            tracing::debug!("join retains no rows, skipping both inputs");
            self.advance(JoinPhase::Done)?;
            return Ok(JoinResult::empty(Arc::clone(&self.spec)));
        }

        let left = self.table(InputTable::Left)?;
        let right = self.table(InputTable::Right)?;
        // The hash input is the smaller one; on a tie the right input is probed.
        let probe_side = if left.size() > right.size() {
            InputTable::Left
        } else {
            InputTable::Right
        };
        let (hash_table, probe_table) = match probe_side {
            InputTable::Left => (right, left),
            InputTable::Right => (left, right),
        };

        let mut run = JoinRun::new(Arc::clone(&self.spec), probe_side.other(), &self.options)?;
        tracing::debug!(
            hash_side = %run.hash_side,
            hash_rows = hash_table.size(),
            probe_rows = probe_table.size(),
            partitions = run.partitions.num_partitions(),
            store_row_offsets = run.store_row_offsets,
            "starting hybrid hash join"
        );

        self.advance(JoinPhase::IndexHash)?;
        run.index_hash_input(hash_table.as_ref(), self.memory.as_mut(), self.monitor.as_ref())?;

        self.advance(JoinPhase::ProbeAndSpill)?;
        run.probe_input(probe_table.as_ref(), self.monitor.as_ref())?;

        self.advance(JoinPhase::JoinDiskPairs)?;
        run.join_disk_partitions(self.options.block_rows, self.monitor.as_ref())?;

        self.advance(JoinPhase::Done)?;
        self.monitor.report_progress(1.0, "join complete");
        Ok(run.finish())
    }

    fn table(&self, side: InputTable) -> Result<Arc<dyn DataTable>> {
        self.spec.settings(side).table().cloned().ok_or_else(|| {
            Error::InvalidArgumentError(format!(
                "the {side} join table settings are not bound to a table"
            ))
        })
    }

    fn advance(&mut self, next: JoinPhase) -> Result<()> {
        if next <= self.phase {
            return Err(Error::Internal(format!(
                "join cannot move from phase '{}' to phase '{next}'",
                self.phase
            )));
        }
        tracing::debug!(from = %self.phase, to = %next, "join phase");
        self.phase = next;
        Ok(())
    }
}

impl fmt::Debug for HybridHashJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridHashJoin")
            .field("spec", &self.spec)
            .field("options", &self.options)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// State of one join while it runs.
struct JoinRun {
    /// The join as configured, over the input layouts.
    spec: Arc<JoinSpecification>,
    /// The same join over the condensed layouts rows are joined in.
    working: Arc<JoinSpecification>,
    hash_side: InputTable,
    store_row_offsets: bool,
    partitions: PartitionManager,
    container: JoinContainer,
    stats: JoinStats,
}

impl JoinRun {
    fn new(
        spec: Arc<JoinSpecification>,
        hash_side: InputTable,
        options: &HybridHashJoinOptions,
    ) -> Result<Self> {
        let store_row_offsets = spec.output_row_order() != OutputRowOrder::Arbitrary
            || !spec.is_effectively_conjunctive();
        let working = Arc::new(spec.with_settings(
            spec.left_settings().condensed(store_row_offsets)?,
            spec.right_settings().condensed(store_row_offsets)?,
        )?);
        let partitions = PartitionManager::new(&working, hash_side, options)?;
        let container = JoinContainer::new(&working, hash_side.other());
        let stats = JoinStats {
            hash_side: Some(hash_side),
            num_partitions: partitions.num_partitions(),
            ..JoinStats::default()
        };
        Ok(Self {
            spec,
            working,
            hash_side,
            store_row_offsets,
            partitions,
            container,
            stats,
        })
    }

    /// Phase 1: index the hash input, spilling partitions when memory is low.
    fn index_hash_input(
        &mut self,
        table: &dyn DataTable,
        memory: &mut dyn MemoryMonitor,
        monitor: &dyn ExecutionMonitor,
    ) -> Result<()> {
        let progress = PhaseProgress::new(
            monitor,
            0.0,
            1.0 / 3.0,
            "Phase 1/3: indexing the smaller table",
        );
        let source = self.spec.settings(self.hash_side);
        let settings = self.working.settings(self.hash_side);
        let mode = self.working.comparison_mode();
        let total = table.size();

        for (offset, row) in (0_u64..).zip(table.rows()) {
            progress.check_canceled()?;
            let row = source.condense_row(&row?, offset, self.store_row_offsets);
            if memory.is_memory_low(self.partitions.in_memory_rows()) {
                self.partitions.flush_next_partition()?;
            }
            match JoinTuple::extract(settings, &row, mode) {
                Some(tuple) => self.partitions.add_hash_row(&tuple, row, offset)?,
                None => self.container.add_unmatched(self.hash_side, &row, offset),
            }
            self.stats.hash_rows += 1;
            progress.report(offset + 1, total);
        }

        self.partitions.close_hash_buckets()?;
        self.container.end_sorted_chunk();
        progress.report(total, total);
        tracing::debug!(
            hash_rows = self.stats.hash_rows,
            partitions_on_disk = self.partitions.num_partitions_on_disk(),
            in_memory_rows = self.partitions.in_memory_rows(),
            "indexed hash input"
        );
        Ok(())
    }

    /// Phase 2: probe in-memory partitions, spill probe rows of on-disk partitions.
    fn probe_input(&mut self, table: &dyn DataTable, monitor: &dyn ExecutionMonitor) -> Result<()> {
        let progress = PhaseProgress::new(
            monitor,
            1.0 / 3.0,
            2.0 / 3.0,
            "Phase 2/3: probing the larger table",
        );
        let probe_side = self.hash_side.other();
        let source = self.spec.settings(probe_side);
        let settings = self.working.settings(probe_side);
        let mode = self.working.comparison_mode();
        let total = table.size();

        for (offset, row) in (0_u64..).zip(table.rows()) {
            progress.check_canceled()?;
            let row = source.condense_row(&row?, offset, self.store_row_offsets);
            match JoinTuple::extract(settings, &row, mode) {
                Some(tuple) => {
                    self.partitions
                        .probe_row(&tuple, &row, offset, &mut self.container)?;
                }
                None => self.container.add_unmatched(probe_side, &row, offset),
            }
            self.stats.probe_rows += 1;
            progress.report(offset + 1, total);
        }

        self.partitions.close_probe_buckets()?;
        self.container.end_sorted_chunk();
        self.partitions
            .emit_in_memory_unmatched(&mut self.container);
        progress.report(total, total);
        tracing::debug!(
            probe_rows = self.stats.probe_rows,
            probe_rows_spilled = self.partitions.probe_rows_spilled(),
            "probed in-memory partitions"
        );
        Ok(())
    }

    /// Phase 3: join every spilled partition from disk.
    fn join_disk_partitions(
        &mut self,
        block_rows: usize,
        monitor: &dyn ExecutionMonitor,
    ) -> Result<()> {
        let progress = PhaseProgress::new(
            monitor,
            2.0 / 3.0,
            1.0,
            "Phase 3/3: joining partitions from disk",
        );
        let disk_partitions = self.partitions.take_disk_partitions()?;
        let total = disk_partitions.len() as u64;
        for (done, partition) in (0_u64..).zip(&disk_partitions) {
            progress.check_canceled()?;
            progress.report(done, total);
            join_disk_partition(
                partition,
                &self.working,
                self.hash_side,
                block_rows,
                &mut self.container,
                &progress,
            )?;
        }
        progress.report(total, total);
        Ok(())
    }

    fn finish(self) -> JoinResult {
        let stats = JoinStats {
            partitions_on_disk: self.partitions.num_partitions_on_disk(),
            hash_rows_spilled: self.partitions.hash_rows_spilled(),
            probe_rows_spilled: self.partitions.probe_rows_spilled(),
            matches: self.container.num_matches(),
            ..self.stats
        };
        tracing::debug!(?stats, "hybrid hash join finished");
        JoinResult::new(self.working, self.container.finish(), stats)
    }
}
