use std::fmt;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::{Schema, SchemaRef};
use spilljoin_result::{Error, Result};

use crate::{DataRow, RowCodec, RowKey, codec::ROW_KEY_COLUMN_NAME};

/// Forward-only cursor over the rows of a table.
pub type RowCursor<'a> = Box<dyn Iterator<Item = Result<DataRow>> + 'a>;

/// A tabular input: a schema, a row count, and a forward row cursor.
///
/// Implementations may stream rows from anywhere; the join engine reads each input at most once
/// per phase and never seeks.
pub trait DataTable: fmt::Debug + Send + Sync {
    fn schema(&self) -> SchemaRef;

    /// Number of rows the cursor will yield.
    fn size(&self) -> u64;

    fn rows(&self) -> RowCursor<'_>;
}

/// In-memory table of rows.
#[derive(Debug, Clone)]
pub struct RowTable {
    schema: SchemaRef,
    rows: Vec<DataRow>,
}

impl RowTable {
    /// Create an empty table.
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Create a table from rows, checking that every row fits the schema.
    pub fn try_new(schema: SchemaRef, rows: Vec<DataRow>) -> Result<Self> {
        let mut table = Self::new(schema);
        table.rows.reserve(rows.len());
        for row in rows {
            table.push(row)?;
        }
        Ok(table)
    }

    pub fn push(&mut self, row: DataRow) -> Result<()> {
        let expected = self.schema.fields().len();
        if row.num_cells() != expected {
            return Err(Error::InvalidArgumentError(format!(
                "row '{}' has {} cells, table has {} columns",
                row.key(),
                row.num_cells(),
                expected
            )));
        }
        for (cell, field) in row.cells().iter().zip(self.schema.fields()) {
            let fits = match cell.data_type() {
                None => field.is_nullable(),
                Some(data_type) => &data_type == field.data_type(),
            };
            if !fits {
                return Err(Error::InvalidArgumentError(format!(
                    "row '{}': cell {cell} does not fit column '{}' of type {}{}",
                    row.key(),
                    field.name(),
                    field.data_type(),
                    if field.is_nullable() { "" } else { " NOT NULL" }
                )));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn as_rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<DataRow> {
        self.rows
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect()
    }

    /// Encode the table as a single batch with a leading row key column.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        RowCodec::new(Arc::clone(&self.schema))?.encode(&self.rows)
    }

    /// Build a table from a batch.
    ///
    /// If the batch carries a [`ROW_KEY_COLUMN_NAME`] column it provides the keys, otherwise
    /// rows are keyed `Row0`, `Row1`, ... in batch order.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<Self> {
        let batch_schema = batch.schema();
        let has_keys = batch_schema
            .fields()
            .first()
            .is_some_and(|field| field.name() == ROW_KEY_COLUMN_NAME);

        if has_keys {
            let data_fields: Vec<_> = batch_schema.fields().iter().skip(1).cloned().collect();
            let data_schema = Arc::new(Schema::new(data_fields));
            let rows = RowCodec::new(Arc::clone(&data_schema))?.decode(batch)?;
            return Ok(Self {
                schema: data_schema,
                rows,
            });
        }

        let codec = RowCodec::new(Arc::clone(&batch_schema))?;
        let keys = arrow::array::StringArray::from_iter_values(
            (0..batch.num_rows() as u64).map(|idx| RowKey::sequence(idx).to_string()),
        );
        let mut columns = Vec::with_capacity(batch.num_columns() + 1);
        columns.push(Arc::new(keys) as arrow::array::ArrayRef);
        columns.extend(batch.columns().iter().cloned());
        let keyed = RecordBatch::try_new(Arc::clone(codec.batch_schema()), columns)?;
        Ok(Self {
            schema: batch_schema,
            rows: codec.decode(&keyed)?,
        })
    }
}

impl DataTable for RowTable {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn size(&self) -> u64 {
        self.rows.len() as u64
    }

    fn rows(&self) -> RowCursor<'_> {
        Box::new(self.rows.iter().cloned().map(Ok))
    }
}

impl fmt::Display for RowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "RowID,{}", self.column_names().join(","))?;
        for row in &self.rows {
            writeln!(f, "{row}")?;
        }
        Ok(())
    }
}
