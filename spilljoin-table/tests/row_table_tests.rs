//! Integration tests for the in-memory row table and its Arrow conversion.

use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use spilljoin_table::{DataCell, DataRow, DataTable, ROW_KEY_COLUMN_NAME, RowTable};

fn people_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("name", DataType::Utf8, true),
    ]))
}

#[test]
fn test_cursor_yields_rows_in_order() {
    spilljoin_test_utils::init_tracing_for_tests();

    let table = RowTable::try_new(
        people_schema(),
        vec![
            DataRow::new("a", vec![1_i64.into(), "ann".into()]),
            DataRow::new("b", vec![2_i64.into(), DataCell::Missing]),
        ],
    )
    .unwrap();

    assert_eq!(table.size(), 2);
    let keys: Vec<String> = table
        .rows()
        .map(|row| row.unwrap().key().to_string())
        .collect();
    assert_eq!(keys, vec!["a", "b"]);
}

#[test]
fn test_row_width_is_checked() {
    let err = RowTable::try_new(
        people_schema(),
        vec![DataRow::new("a", vec![1_i64.into()])],
    )
    .unwrap_err();
    assert!(err.to_string().contains("has 1 cells"));
}

#[test]
fn test_cell_types_are_checked() {
    let err = RowTable::try_new(
        people_schema(),
        vec![DataRow::new("a", vec![1_i32.into(), "ann".into()])],
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'id' of type Int64"), "{message}");

    let strict = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
    let mut table = RowTable::try_new(Arc::clone(&strict), Vec::new()).unwrap();
    let err = table
        .push(DataRow::new("b", vec![DataCell::Missing]))
        .unwrap_err();
    assert!(err.to_string().contains("NOT NULL"), "{err}");
    assert!(table.is_empty());

    table.push(DataRow::new("c", vec![7_i64.into()])).unwrap();
    assert_eq!(table.len(), 1);
}

#[test]
fn test_record_batch_with_and_without_keys() {
    let batch = RecordBatch::try_new(
        people_schema(),
        vec![
            Arc::new(Int64Array::from(vec![Some(10), None])),
            Arc::new(StringArray::from(vec![Some("x"), Some("y")])),
        ],
    )
    .unwrap();

    let table = RowTable::from_record_batch(&batch).unwrap();
    assert_eq!(table.as_rows()[0].key().as_str(), "Row0");
    assert_eq!(table.as_rows()[1].key().as_str(), "Row1");
    assert!(table.as_rows()[1].cell(0).is_missing());

    let keyed = table.to_record_batch().unwrap();
    assert_eq!(keyed.schema().field(0).name(), ROW_KEY_COLUMN_NAME);

    let round = RowTable::from_record_batch(&keyed).unwrap();
    assert_eq!(round.as_rows(), table.as_rows());
    assert_eq!(round.column_names(), vec!["id", "name"]);
}
