//! Row-oriented tables consumed and produced by the spilljoin engine.
//!
//! The join engine works one row at a time: it pulls [`DataRow`]s from a forward-only cursor,
//! extracts join values from their [`DataCell`]s, and writes rows it cannot keep in memory to
//! spill files. This crate provides those pieces:
//!
//! - [`DataCell`]: a typed, nullable cell value.
//! - [`RowKey`] and [`DataRow`]: a keyed row of cells.
//! - [`DataTable`]: the input abstraction (schema, size, row cursor) and [`RowTable`], its
//!   in-memory implementation used for test inputs and all join outputs.
//! - [`RowCodec`]: conversion between rows and Arrow [`RecordBatch`]es. Spill files are Arrow IPC
//!   streams written through this codec.
//!
//! [`RecordBatch`]: arrow::record_batch::RecordBatch
#![forbid(unsafe_code)]

mod cell;
mod codec;
mod row;
mod table;

pub use arrow;
pub use cell::DataCell;
pub use codec::{ROW_KEY_COLUMN_NAME, RowCodec, is_supported_type};
pub use row::{DataRow, RowKey};
pub use table::{DataTable, RowCursor, RowTable};
