//! Conversion between [`DataRow`]s and Arrow record batches.
//!
//! Batches produced by the codec carry the row keys in a leading `Utf8` column named
//! [`ROW_KEY_COLUMN_NAME`], followed by the data columns in schema order.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int32Array,
    Int32Builder, Int64Array, Int64Builder, RecordBatch, StringArray, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use spilljoin_result::{Error, Result};

use crate::{DataCell, DataRow, RowKey};

/// Name of the hidden column holding row keys in encoded batches.
pub const ROW_KEY_COLUMN_NAME: &str = "__row_key";

/// Whether rows with a column of this type can be encoded.
pub fn is_supported_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Boolean | DataType::Int32 | DataType::Int64 | DataType::Float64 | DataType::Utf8
    )
}

/// Encodes rows of one schema into record batches and back.
#[derive(Debug, Clone)]
pub struct RowCodec {
    data_schema: SchemaRef,
    batch_schema: SchemaRef,
}

impl RowCodec {
    /// Create a codec for rows laid out according to `data_schema`.
    pub fn new(data_schema: SchemaRef) -> Result<Self> {
        let mut fields = Vec::with_capacity(data_schema.fields().len() + 1);
        fields.push(Arc::new(Field::new(ROW_KEY_COLUMN_NAME, DataType::Utf8, false)));
        for field in data_schema.fields() {
            if !is_supported_type(field.data_type()) {
                return Err(Error::InvalidArgumentError(format!(
                    "column '{}' has unsupported type {:?}",
                    field.name(),
                    field.data_type()
                )));
            }
            if field.name() == ROW_KEY_COLUMN_NAME {
                return Err(Error::InvalidArgumentError(format!(
                    "column name '{ROW_KEY_COLUMN_NAME}' is reserved"
                )));
            }
            fields.push(Arc::new(field.as_ref().clone().with_nullable(true)));
        }
        Ok(Self {
            data_schema,
            batch_schema: Arc::new(Schema::new(fields)),
        })
    }

    pub fn data_schema(&self) -> &SchemaRef {
        &self.data_schema
    }

    /// Schema of the batches this codec produces: row key column plus data columns.
    pub fn batch_schema(&self) -> &SchemaRef {
        &self.batch_schema
    }

    /// Encode rows into a single batch.
    pub fn encode(&self, rows: &[DataRow]) -> Result<RecordBatch> {
        let mut keys = StringBuilder::with_capacity(rows.len(), rows.len() * 8);
        for row in rows {
            keys.append_value(row.key().as_str());
        }

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.batch_schema.fields().len());
        columns.push(Arc::new(keys.finish()));
        for (col_idx, field) in self.data_schema.fields().iter().enumerate() {
            columns.push(encode_column(rows, col_idx, field)?);
        }

        Ok(RecordBatch::try_new(Arc::clone(&self.batch_schema), columns)?)
    }

    /// Decode a batch produced by [`RowCodec::encode`] back into rows.
    pub fn decode(&self, batch: &RecordBatch) -> Result<Vec<DataRow>> {
        if batch.num_columns() != self.batch_schema.fields().len() {
            return Err(Error::Internal(format!(
                "encoded batch has {} columns, codec expects {}",
                batch.num_columns(),
                self.batch_schema.fields().len()
            )));
        }

        let keys = downcast::<StringArray>(batch.column(0), ROW_KEY_COLUMN_NAME)?;
        let mut cells: Vec<Vec<DataCell>> = (0..batch.num_rows())
            .map(|_| Vec::with_capacity(self.data_schema.fields().len()))
            .collect();

        for (col_idx, field) in self.data_schema.fields().iter().enumerate() {
            let column = batch.column(col_idx + 1);
            decode_column(column, field, &mut cells)?;
        }

        Ok(cells
            .into_iter()
            .enumerate()
            .map(|(row_idx, row_cells)| DataRow::new(RowKey::new(keys.value(row_idx)), row_cells))
            .collect())
    }
}

fn type_mismatch(field: &Field, cell: &DataCell) -> Error {
    Error::InvalidArgumentError(format!(
        "cell {cell} of type {:?} does not fit column '{}' of type {:?}",
        cell.data_type(),
        field.name(),
        field.data_type()
    ))
}

fn encode_column(rows: &[DataRow], col_idx: usize, field: &Field) -> Result<ArrayRef> {
    let array: ArrayRef = match field.data_type() {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                match row.cell(col_idx) {
                    DataCell::Missing => builder.append_null(),
                    DataCell::Boolean(v) => builder.append_value(*v),
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Int32 => {
            let mut builder = Int32Builder::with_capacity(rows.len());
            for row in rows {
                match row.cell(col_idx) {
                    DataCell::Missing => builder.append_null(),
                    DataCell::Int32(v) => builder.append_value(*v),
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Int64 => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for row in rows {
                match row.cell(col_idx) {
                    DataCell::Missing => builder.append_null(),
                    DataCell::Int64(v) => builder.append_value(*v),
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                match row.cell(col_idx) {
                    DataCell::Missing => builder.append_null(),
                    DataCell::Float64(v) => builder.append_value(*v),
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Arc::new(builder.finish())
        }
        DataType::Utf8 => {
            let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 8);
            for row in rows {
                match row.cell(col_idx) {
                    DataCell::Missing => builder.append_null(),
                    DataCell::Utf8(v) => builder.append_value(v),
                    other => return Err(type_mismatch(field, other)),
                }
            }
            Arc::new(builder.finish())
        }
        dt => {
            return Err(Error::InvalidArgumentError(format!(
                "unsupported column type {dt:?}"
            )));
        }
    };
    Ok(array)
}

fn downcast<'a, T: 'static>(column: &'a ArrayRef, name: &str) -> Result<&'a T> {
    column.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::Internal(format!(
            "column '{name}' has unexpected array type {:?}",
            column.data_type()
        ))
    })
}

fn decode_column(column: &ArrayRef, field: &Field, cells: &mut [Vec<DataCell>]) -> Result<()> {
    macro_rules! decode_with {
        ($array_ty:ty, $variant:ident, $convert:expr) => {{
            let array = downcast::<$array_ty>(column, field.name())?;
            for (row_idx, row_cells) in cells.iter_mut().enumerate() {
                if array.is_null(row_idx) {
                    row_cells.push(DataCell::Missing);
                } else {
                    row_cells.push(DataCell::$variant($convert(array.value(row_idx))));
                }
            }
        }};
    }

    match field.data_type() {
        DataType::Boolean => decode_with!(BooleanArray, Boolean, |v| v),
        DataType::Int32 => decode_with!(Int32Array, Int32, |v| v),
        DataType::Int64 => decode_with!(Int64Array, Int64, |v| v),
        DataType::Float64 => decode_with!(Float64Array, Float64, |v| v),
        DataType::Utf8 => decode_with!(StringArray, Utf8, |v: &str| v.to_string()),
        dt => {
            return Err(Error::InvalidArgumentError(format!(
                "unsupported column type {dt:?}"
            )));
        }
    }
    Ok(())
}
