//! Output of a join.

use std::fmt;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use spilljoin_result::{Error, Result};
use spilljoin_table::RowTable;

use crate::container::CollectedRows;
use crate::settings::InputTable;
use crate::specification::{JoinSpecification, UnmatchedOutput};

/// Counters describing how a join ran.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JoinStats {
    /// The input that was indexed; `None` if the join did not read its inputs.
    pub hash_side: Option<InputTable>,
    pub num_partitions: usize,
    pub partitions_on_disk: usize,
    pub hash_rows: u64,
    pub probe_rows: u64,
    /// Hash rows written to disk, counting a row once per partition it was written to.
    pub hash_rows_spilled: u64,
    /// Probe rows written to disk, counting a row once per partition it was written to.
    pub probe_rows_spilled: u64,
    /// Distinct matching row pairs, whether or not matches were retained.
    pub matches: u64,
}

/// The output tables of a join, arranged as the join was configured to deliver them.
#[derive(Debug, Clone)]
pub enum JoinOutput {
    SeparateTables {
        matches: RowTable,
        left_unmatched: RowTable,
        right_unmatched: RowTable,
    },
    SingleTable(RowTable),
}

/// Rows produced by a join, in output order.
///
/// Output tables are materialized on request; every call creates fresh row keys, so keys that
/// depend on a sequence start over for each table.
pub struct JoinResult {
    spec: Arc<JoinSpecification>,
    rows: CollectedRows,
    stats: JoinStats,
}

impl JoinResult {
    pub(crate) fn new(spec: Arc<JoinSpecification>, rows: CollectedRows, stats: JoinStats) -> Self {
        Self { spec, rows, stats }
    }

    pub(crate) fn empty(spec: Arc<JoinSpecification>) -> Self {
        Self::new(spec, CollectedRows::default(), JoinStats::default())
    }

    pub fn stats(&self) -> &JoinStats {
        &self.stats
    }

    pub fn num_matches(&self) -> usize {
        self.rows.matches.len()
    }

    pub fn num_unmatched(&self, side: InputTable) -> usize {
        self.rows.unmatched[side.index()].len()
    }

    pub fn match_schema(&self) -> SchemaRef {
        self.spec.spec_for_match_table()
    }

    /// The matching row pairs, joined.
    pub fn matches(&self) -> Result<RowTable> {
        let mut keys = self.spec.row_key_strategy().generator();
        let rows = self
            .rows
            .matches
            .iter()
            .map(|pair| self.spec.row_join(&pair.left, &pair.right, &mut keys))
            .collect();
        RowTable::try_new(self.spec.spec_for_match_table(), rows)
    }

    /// Unmatched rows of `side`, projected to its include columns with their original keys.
    pub fn unmatched(&self, side: InputTable) -> Result<RowTable> {
        let rows = self.rows.unmatched[side.index()]
            .iter()
            .map(|row| self.spec.row_project_outer(side, row))
            .collect();
        RowTable::try_new(self.spec.spec_for_unmatched(side), rows)
    }

    pub fn left_unmatched(&self) -> Result<RowTable> {
        self.unmatched(InputTable::Left)
    }

    pub fn right_unmatched(&self) -> Result<RowTable> {
        self.unmatched(InputTable::Right)
    }

    /// Matches, then left unmatched rows, then right unmatched rows, in the match table layout.
    pub fn single_table(&self) -> Result<RowTable> {
        if self.spec.row_key_strategy().is_keep_original()
            && !self.spec.keeps_row_keys_legal(UnmatchedOutput::SingleTable)
        {
            return Err(Error::InvalidArgumentError(
                "original row keys cannot be kept in a single output table: keys could repeat"
                    .to_string(),
            ));
        }

        let mut keys = self.spec.row_key_strategy().generator();
        let mut rows = Vec::with_capacity(
            self.rows.matches.len() + self.rows.unmatched.iter().map(Vec::len).sum::<usize>(),
        );
        for pair in &self.rows.matches {
            rows.push(self.spec.row_join(&pair.left, &pair.right, &mut keys));
        }
        for row in &self.rows.unmatched[InputTable::Left.index()] {
            rows.push(self.spec.left_to_single_table_format(row, &mut keys));
        }
        for row in &self.rows.unmatched[InputTable::Right.index()] {
            rows.push(self.spec.right_to_single_table_format(row, &mut keys));
        }
        RowTable::try_new(self.spec.spec_for_match_table(), rows)
    }

    /// The output in the configured [`UnmatchedOutput`] arrangement.
    pub fn output(&self) -> Result<JoinOutput> {
        match self.spec.unmatched_output() {
            UnmatchedOutput::SeparateTables => Ok(JoinOutput::SeparateTables {
                matches: self.matches()?,
                left_unmatched: self.left_unmatched()?,
                right_unmatched: self.right_unmatched()?,
            }),
            UnmatchedOutput::SingleTable => Ok(JoinOutput::SingleTable(self.single_table()?)),
        }
    }
}

impl fmt::Debug for JoinResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinResult")
            .field("matches", &self.rows.matches.len())
            .field("left_unmatched", &self.num_unmatched(InputTable::Left))
            .field("right_unmatched", &self.num_unmatched(InputTable::Right))
            .field("stats", &self.stats)
            .finish()
    }
}
