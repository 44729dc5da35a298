use std::fmt;
use std::sync::Arc;

use crate::DataCell;

/// Identifier of a row within its table.
///
/// Keys are cheap to clone; output rows frequently reuse the key of an input row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Arc<str>);

impl RowKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// The `RowN` key used for sequentially numbered rows.
    pub fn sequence(index: u64) -> Self {
        Self::new(format!("Row{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RowKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// A keyed row of cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataRow {
    key: RowKey,
    cells: Vec<DataCell>,
}

impl DataRow {
    pub fn new(key: impl Into<RowKey>, cells: Vec<DataCell>) -> Self {
        Self {
            key: key.into(),
            cells,
        }
    }

    pub fn key(&self) -> &RowKey {
        &self.key
    }

    pub fn cells(&self) -> &[DataCell] {
        &self.cells
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Cell at `index`; out-of-range indices read as missing.
    pub fn cell(&self, index: usize) -> &DataCell {
        static MISSING: DataCell = DataCell::Missing;
        self.cells.get(index).unwrap_or(&MISSING)
    }

    /// Split the row into its key and cells.
    pub fn into_parts(self) -> (RowKey, Vec<DataCell>) {
        (self.key, self.cells)
    }
}

impl fmt::Display for DataRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for cell in &self.cells {
            write!(f, ",{cell}")?;
        }
        Ok(())
    }
}
