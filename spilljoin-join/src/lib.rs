//! Hybrid hash join of two row tables on equality of join columns.
//!
//! A join is described by a [`JoinSpecification`]: one [`JoinTableSettings`] per input naming
//! its join columns, its included columns and whether its unmatched rows are kept, plus
//! join-wide choices such as conjunctive or disjunctive clauses, the output row order and how
//! output row keys are formed. [`HybridHashJoin`] executes the join within a memory budget
//! decided by a [`MemoryMonitor`], spilling hash partitions to Arrow IPC files under pressure,
//! and returns a [`JoinResult`] from which the match and unmatched tables are materialized.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use spilljoin_join::*;
//! # use spilljoin_table::RowTable;
//! # fn run(left: Arc<RowTable>, right: Arc<RowTable>) -> spilljoin_result::Result<()> {
//! let left = JoinTableSettings::for_table(InputTable::Left, true, ["id"], ["id", "name"], left)?;
//! let right = JoinTableSettings::for_table(InputTable::Right, false, ["id"], ["score"], right)?;
//! let spec = JoinSpecification::builder(left, right)
//!     .output_row_order(OutputRowOrder::LeftRight)
//!     .build()?;
//! let result = HybridHashJoin::try_new(spec, HybridHashJoinOptions::default())?
//!     .with_memory_monitor(RowBudget::new(1_000_000))
//!     .join()?;
//! let matches = result.matches()?;
//! let left_only = result.left_unmatched()?;
//! # let _ = (matches, left_only);
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod block_join;
mod container;
mod disk_bucket;
mod hash_index;
mod hybrid_hash_join;
mod monitor;
mod options;
mod partitions;
mod result;
mod settings;
mod specification;
mod tuple;

pub use hybrid_hash_join::{HybridHashJoin, JoinPhase};
pub use monitor::{
    AlwaysLow, CancellationToken, ExecutionMonitor, MemoryMonitor, NeverLow, NoopMonitor,
    RowBudget,
};
pub use options::{HybridHashJoinOptions, validate_join_options};
pub use result::{JoinOutput, JoinResult, JoinStats};
pub use settings::{
    InputTable, JoinColumn, JoinTableSettings, ROW_OFFSET_COLUMN_NAME, SpecialJoinColumn,
};
pub use specification::{
    ColumnNameDisambiguator, CustomRowKeyFn, DataCellComparisonMode, JoinSpecification,
    JoinSpecificationBuilder, OutputRowOrder, RowKeyGenerator, RowKeyStrategy, UnmatchedOutput,
    default_column_name_disambiguator, disambiguate_column_name, keep_row_keys_legal,
};
pub use tuple::JoinTuple;
