//! End-to-end joins of Arrow record batches through the facade crate.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::util::pretty::pretty_format_batches;
use spilljoin::{
    AlwaysLow, DataTable, HybridHashJoin, HybridHashJoinOptions, InputTable, JoinOutput,
    JoinSpecification, JoinTableSettings, OutputRowOrder, ROW_KEY_COLUMN_NAME, RowKeyStrategy,
    RowTable, UnmatchedOutput,
};
use spilljoin_test_utils::spill_file_count;

fn left_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("name", DataType::Utf8, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![Some(1), Some(2), Some(3), None])) as ArrayRef,
            Arc::new(StringArray::from(vec!["one", "two", "three", "none"])) as ArrayRef,
        ],
    )
    .unwrap()
}

fn right_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new(ROW_KEY_COLUMN_NAME, DataType::Utf8, false),
        Field::new("id", DataType::Int64, true),
        Field::new("score", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef,
            Arc::new(Int64Array::from(vec![2, 3, 3])) as ArrayRef,
            Arc::new(Float64Array::from(vec![0.25, 0.5, 0.75])) as ArrayRef,
        ],
    )
    .unwrap()
}

fn spec(unmatched_output: UnmatchedOutput) -> JoinSpecification {
    let left: Arc<dyn DataTable> = Arc::new(RowTable::from_record_batch(&left_batch()).unwrap());
    let right: Arc<dyn DataTable> = Arc::new(RowTable::from_record_batch(&right_batch()).unwrap());
    JoinSpecification::builder(
        JoinTableSettings::for_table(InputTable::Left, true, ["id"], ["id", "name"], left)
            .unwrap(),
        JoinTableSettings::for_table(InputTable::Right, false, ["id"], ["score"], right).unwrap(),
    )
    .output_row_order(OutputRowOrder::LeftRight)
    .unmatched_output(unmatched_output)
    .row_key_strategy(RowKeyStrategy::concatenate("_"))
    .build()
    .unwrap()
}

fn keys(batch: &RecordBatch) -> Vec<String> {
    let keys = batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("row key column");
    keys.iter().map(|key| key.unwrap_or_default().to_string()).collect()
}

#[test]
fn test_join_record_batches_with_spilling() {
    let dir = tempfile::tempdir().unwrap();
    let options = HybridHashJoinOptions::default()
        .with_num_partitions(2)
        .with_spill_dir(dir.path());
    let result = HybridHashJoin::try_new(spec(UnmatchedOutput::SeparateTables), options)
        .unwrap()
        .with_memory_monitor(AlwaysLow)
        .join()
        .unwrap();
    assert_eq!(spill_file_count(dir.path()), 0);
    assert_eq!(result.stats().hash_side, Some(InputTable::Right));
    assert_eq!(result.stats().partitions_on_disk, 2);

    let JoinOutput::SeparateTables {
        matches,
        left_unmatched,
        right_unmatched,
    } = result.output().unwrap()
    else {
        panic!("expected separate output tables");
    };

    let batch = matches.to_record_batch().unwrap();
    let names: Vec<&str> = batch
        .schema_ref()
        .fields()
        .iter()
        .map(|field| field.name().as_str())
        .collect();
    assert_eq!(names, [ROW_KEY_COLUMN_NAME, "id", "name", "score"]);
    assert_eq!(keys(&batch), ["Row1_a", "Row2_b", "Row2_c"]);
    let scores = batch
        .column(3)
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    assert_eq!(scores.values().to_vec(), [0.25, 0.5, 0.75]);

    let unmatched = left_unmatched.to_record_batch().unwrap();
    assert_eq!(keys(&unmatched), ["Row0", "Row3"]);
    assert!(unmatched.column(1).is_null(1));
    assert!(right_unmatched.is_empty());

    let pretty = pretty_format_batches(&[batch]).unwrap().to_string();
    assert!(pretty.contains("Row2_c"), "{pretty}");
    assert!(pretty.contains("three"), "{pretty}");
}

#[test]
fn test_single_table_output_pads_unmatched_rows() {
    let result = HybridHashJoin::try_new(
        spec(UnmatchedOutput::SingleTable),
        HybridHashJoinOptions::default(),
    )
    .unwrap()
    .join()
    .unwrap();

    let JoinOutput::SingleTable(table) = result.output().unwrap() else {
        panic!("expected a single output table");
    };
    let batch = table.to_record_batch().unwrap();
    assert_eq!(
        keys(&batch),
        ["Row1_a", "Row2_b", "Row2_c", "Row0_?", "Row3_?"]
    );
    let scores = batch.column(3);
    assert_eq!(scores.null_count(), 2);
    assert!(scores.is_null(3) && scores.is_null(4));
}
