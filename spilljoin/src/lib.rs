//! spilljoin: hybrid hash join over row tables that may exceed memory.
//!
//! This crate is the entrypoint of the spilljoin workspace and re-exports its public API:
//!
//! - **Tables** (`spilljoin-table`): [`DataTable`] inputs, [`RowTable`] outputs, and the
//!   conversion of both to and from Arrow record batches.
//! - **Join** (`spilljoin-join`): [`JoinTableSettings`] and [`JoinSpecification`] describe a
//!   join; [`HybridHashJoin`] runs it and returns a [`JoinResult`].
//! - **Errors** (`spilljoin-result`): the shared [`Error`] and [`Result`] types.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use spilljoin::arrow::datatypes::{DataType, Field, Schema};
//! use spilljoin::{
//!     DataRow, DataTable, HybridHashJoin, HybridHashJoinOptions, InputTable,
//!     JoinSpecification, JoinTableSettings, RowTable,
//! };
//!
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("id", DataType::Utf8, true),
//!     Field::new("value", DataType::Int64, true),
//! ]));
//! let left: Arc<dyn DataTable> = Arc::new(
//!     RowTable::try_new(Arc::clone(&schema), vec![DataRow::new("l0", vec!["a".into(), 1_i64.into()])])
//!         .unwrap(),
//! );
//! let right: Arc<dyn DataTable> = Arc::new(
//!     RowTable::try_new(schema, vec![DataRow::new("r0", vec!["a".into(), 2_i64.into()])])
//!         .unwrap(),
//! );
//!
//! let spec = JoinSpecification::builder(
//!     JoinTableSettings::for_table(InputTable::Left, false, ["id"], ["id", "value"], left).unwrap(),
//!     JoinTableSettings::for_table(InputTable::Right, false, ["id"], ["value"], right).unwrap(),
//! )
//! .build()
//! .unwrap();
//!
//! let result = HybridHashJoin::try_new(spec, HybridHashJoinOptions::default())
//!     .unwrap()
//!     .join()
//!     .unwrap();
//! let matches = result.matches().unwrap();
//! assert_eq!(matches.column_names(), ["id", "value", "value (#1)"]);
//! assert_eq!(matches.as_rows()[0].to_string(), "Row0,a,1,2");
//! ```
#![forbid(unsafe_code)]

pub use spilljoin_join::*;
pub use spilljoin_result::{Error, Result};
pub use spilljoin_table::{
    DataCell, DataRow, DataTable, ROW_KEY_COLUMN_NAME, RowCodec, RowCursor, RowKey, RowTable,
};

/// The Arrow version spilljoin is built against.
pub use spilljoin_table::arrow;
