//! Join tuple extraction and hashing.
//!
//! A join tuple holds the values of a row's join clause operands, normalized according to the
//! comparison mode. Rows with a missing join value have no tuple and never match. Hashes use
//! [`FxHasher`], which has no random seed, so a row lands in the same partition on every run.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use spilljoin_table::{DataCell, DataRow};

use crate::settings::{JoinTableSettings, SpecialJoinColumn};
use crate::specification::DataCellComparisonMode;

/// The join values of one row, in clause order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinTuple {
    values: Vec<DataCell>,
}

impl JoinTuple {
    /// Extract the join values of `row`, or `None` if any of them is missing.
    pub fn extract(
        settings: &JoinTableSettings,
        row: &DataRow,
        mode: DataCellComparisonMode,
    ) -> Option<Self> {
        let mut values = Vec::with_capacity(settings.num_clauses());
        for &column in settings.join_clause_columns() {
            let cell = match usize::try_from(column) {
                Ok(index) => row.cell(index).clone(),
                Err(_) => match SpecialJoinColumn::from_index(column)? {
                    SpecialJoinColumn::RowKey => DataCell::Utf8(row.key().to_string()),
                },
            };
            if cell.is_missing() {
                return None;
            }
            values.push(normalize(cell, mode));
        }
        Some(Self { values })
    }

    pub fn values(&self) -> &[DataCell] {
        &self.values
    }

    pub fn value(&self, clause: usize) -> &DataCell {
        &self.values[clause]
    }

    /// Hash over all values, in order.
    pub fn conjunctive_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        for value in &self.values {
            value.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Hash of the value of a single clause.
    pub fn disjunctive_hash(&self, clause: usize) -> u64 {
        let mut hasher = FxHasher::default();
        self.values[clause].hash(&mut hasher);
        hasher.finish()
    }
}

fn normalize(cell: DataCell, mode: DataCellComparisonMode) -> DataCell {
    match mode {
        DataCellComparisonMode::Strict => cell,
        DataCellComparisonMode::AsString => match cell {
            DataCell::Utf8(_) => cell,
            other => DataCell::Utf8(other.to_string()),
        },
        DataCellComparisonMode::NumericAsLong => match cell {
            DataCell::Boolean(value) => DataCell::Int64(i64::from(value)),
            other => match other.as_i64() {
                Some(value) => DataCell::Int64(value),
                None => other,
            },
        },
    }
}
