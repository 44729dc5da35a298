//! Integration tests for the hybrid hash join.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spilljoin_join::{
    AlwaysLow, CancellationToken, DataCellComparisonMode, ExecutionMonitor, HybridHashJoin,
    HybridHashJoinOptions, InputTable, JoinOutput, JoinPhase, JoinResult, JoinSpecification,
    JoinTableSettings, MemoryMonitor, NeverLow, OutputRowOrder, RowBudget, RowKeyStrategy,
    UnmatchedOutput,
};
use spilljoin_result::Error;
use spilljoin_table::{DataCell, DataRow, DataTable, RowCursor, RowTable};
use spilljoin_test_utils::{init_tracing_for_tests, spill_dir, spill_file_count};

fn schema(columns: &[(&str, DataType)]) -> SchemaRef {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|(name, data_type)| Field::new(*name, data_type.clone(), true))
            .collect::<Vec<_>>(),
    ))
}

fn table(columns: &[(&str, DataType)], rows: Vec<DataRow>) -> Arc<RowTable> {
    Arc::new(RowTable::try_new(schema(columns), rows).expect("rows fit the schema"))
}

fn settings(
    side: InputTable,
    retain_unmatched: bool,
    joins: &[&str],
    includes: &[&str],
    table: &Arc<RowTable>,
) -> JoinTableSettings {
    JoinTableSettings::for_table(
        side,
        retain_unmatched,
        joins.iter().copied(),
        includes.iter().copied(),
        Arc::clone(table) as Arc<dyn DataTable>,
    )
    .expect("valid join settings")
}

fn run(
    spec: JoinSpecification,
    options: HybridHashJoinOptions,
    memory: impl MemoryMonitor + 'static,
) -> JoinResult {
    HybridHashJoin::try_new(spec, options)
        .expect("valid join")
        .with_memory_monitor(memory)
        .join()
        .expect("join succeeds")
}

fn rendered(table: &RowTable) -> Vec<String> {
    table.as_rows().iter().map(ToString::to_string).collect()
}

fn column_names(schema: &SchemaRef) -> Vec<String> {
    schema.fields().iter().map(|f| f.name().clone()).collect()
}

/// `l<i>` / `r<j>` keyed tables over one Int64 join column `k` and one Utf8 payload column.
fn random_tables(seed: u64, left_rows: usize, right_rows: usize) -> (Arc<RowTable>, Arc<RowTable>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = |prefix: &str, count: usize| -> Vec<DataRow> {
        (0..count)
            .map(|i| {
                let key: DataCell = if rng.random_bool(0.05) {
                    DataCell::Missing
                } else {
                    rng.random_range(0..40_i64).into()
                };
                DataRow::new(
                    format!("{prefix}{i}"),
                    vec![key, format!("{prefix}-payload-{i}").into()],
                )
            })
            .collect()
    };
    let left = rows("l", left_rows);
    let right = rows("r", right_rows);
    let columns = [("k", DataType::Int64), ("payload", DataType::Utf8)];
    (table(&columns, left), table(&columns, right))
}

fn random_spec(
    left: &Arc<RowTable>,
    right: &Arc<RowTable>,
    order: OutputRowOrder,
) -> JoinSpecification {
    JoinSpecification::builder(
        settings(InputTable::Left, true, &["k"], &["k", "payload"], left),
        settings(InputTable::Right, true, &["k"], &["payload"], right),
    )
    .output_row_order(order)
    .row_key_strategy(RowKeyStrategy::concatenate("|"))
    .build()
    .expect("valid spec")
}

/// Every output table of a result, rendered.
fn all_outputs(result: &JoinResult) -> [Vec<String>; 3] {
    [
        rendered(&result.matches().expect("matches")),
        rendered(&result.left_unmatched().expect("left unmatched")),
        rendered(&result.right_unmatched().expect("right unmatched")),
    ]
}

/// Input positions of the matched pairs, read back from `l<i>|r<j>` keys.
fn matched_positions(result: &JoinResult) -> Vec<(usize, usize)> {
    result
        .matches()
        .expect("matches")
        .as_rows()
        .iter()
        .map(|row| {
            let (left, right) = row.key().as_str().split_once('|').expect("concatenated key");
            (
                left[1..].parse().expect("left position"),
                right[1..].parse().expect("right position"),
            )
        })
        .collect()
}

fn scenario_tables() -> (Arc<RowTable>, Arc<RowTable>) {
    let left = table(
        &[("id", DataType::Utf8)],
        vec![
            DataRow::new("l0", vec!["a".into()]),
            DataRow::new("l1", vec!["b".into()]),
        ],
    );
    let right = table(
        &[("id", DataType::Utf8), ("val", DataType::Utf8)],
        vec![
            DataRow::new("r0", vec!["a".into(), "x".into()]),
            DataRow::new("r1", vec!["c".into(), "y".into()]),
        ],
    );
    (left, right)
}

fn scenario_spec(left: &Arc<RowTable>, right: &Arc<RowTable>) -> JoinSpecification {
    JoinSpecification::builder(
        settings(InputTable::Left, false, &["id"], &["id"], left),
        settings(InputTable::Right, false, &["id"], &["val"], right),
    )
    .row_key_strategy(RowKeyStrategy::concatenate("_"))
    .build()
    .expect("valid spec")
}

#[test]
fn test_inner_join_emits_single_match() {
    init_tracing_for_tests();
    let (left, right) = scenario_tables();
    let result = run(
        scenario_spec(&left, &right),
        HybridHashJoinOptions::default(),
        NeverLow,
    );

    assert_eq!(column_names(&result.match_schema()), ["id", "val"]);
    assert_eq!(rendered(&result.matches().unwrap()), ["l0_r0,a,x"]);
    assert!(result.left_unmatched().unwrap().is_empty());
    assert!(result.right_unmatched().unwrap().is_empty());

    let stats = result.stats();
    assert_eq!(stats.hash_side, Some(InputTable::Left));
    assert_eq!(stats.partitions_on_disk, 0);
    assert_eq!(stats.hash_rows, 2);
    assert_eq!(stats.probe_rows, 2);
    assert_eq!(stats.matches, 1);
}

#[test]
fn test_single_partition_spilled_before_first_row_joins_from_disk() {
    init_tracing_for_tests();
    let dir = spill_dir();
    let (left, right) = scenario_tables();
    let options = HybridHashJoinOptions::default()
        .with_num_partitions(1)
        .with_spill_dir(dir.path());
    let result = run(scenario_spec(&left, &right), options, AlwaysLow);

    assert_eq!(rendered(&result.matches().unwrap()), ["l0_r0,a,x"]);
    let stats = result.stats();
    assert_eq!(stats.num_partitions, 1);
    assert_eq!(stats.partitions_on_disk, 1);
    assert_eq!(stats.hash_rows_spilled, 2);
    assert_eq!(stats.probe_rows_spilled, 2);
    assert_eq!(spill_file_count(dir.path()), 0);
}

#[test]
fn test_disjunctive_join_reports_each_pair_once() {
    init_tracing_for_tests();
    let columns = [("a", DataType::Int64), ("b", DataType::Int64)];
    let left = table(&columns, vec![DataRow::new("l0", vec![1_i64.into(), 2_i64.into()])]);
    let right = table(
        &columns,
        vec![
            DataRow::new("r0", vec![1_i64.into(), 2_i64.into()]),
            DataRow::new("r1", vec![1_i64.into(), 9_i64.into()]),
            DataRow::new("r2", vec![7_i64.into(), 2_i64.into()]),
            DataRow::new("r3", vec![5_i64.into(), 5_i64.into()]),
        ],
    );
    let spec = JoinSpecification::builder(
        settings(InputTable::Left, false, &["a", "b"], &["a", "b"], &left),
        settings(InputTable::Right, true, &["a", "b"], &["a", "b"], &right),
    )
    .conjunctive(false)
    .output_row_order(OutputRowOrder::Deterministic)
    .row_key_strategy(RowKeyStrategy::concatenate("_"))
    .build()
    .unwrap();

    let in_memory = run(spec.clone(), HybridHashJoinOptions::default(), NeverLow);
    assert_eq!(
        column_names(&in_memory.match_schema()),
        ["a", "b", "a (#1)", "b (#1)"]
    );
    assert_eq!(
        rendered(&in_memory.matches().unwrap()),
        ["l0_r0,1,2,1,2", "l0_r1,1,2,1,9", "l0_r2,1,2,7,2"]
    );
    assert_eq!(rendered(&in_memory.right_unmatched().unwrap()), ["r3,5,5"]);
    assert_eq!(in_memory.stats().matches, 3);

    let dir = spill_dir();
    let options = HybridHashJoinOptions::default()
        .with_num_partitions(4)
        .with_spill_dir(dir.path());
    let spilled = run(spec, options, AlwaysLow);
    assert_eq!(all_outputs(&spilled), all_outputs(&in_memory));
    assert_eq!(spilled.stats().matches, 3);
}

/// Two Int64 join columns drawn from a small range, so rows often satisfy one clause or both.
fn random_two_clause_tables(seed: u64) -> (Arc<RowTable>, Arc<RowTable>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = |prefix: &str, count: usize| -> Vec<DataRow> {
        (0..count)
            .map(|i| {
                let mut value = || -> DataCell {
                    if rng.random_bool(0.05) {
                        DataCell::Missing
                    } else {
                        rng.random_range(0..15_i64).into()
                    }
                };
                let cells = vec![value(), value()];
                DataRow::new(format!("{prefix}{i}"), cells)
            })
            .collect()
    };
    let left = rows("l", 120);
    let right = rows("r", 90);
    let columns = [("a", DataType::Int64), ("b", DataType::Int64)];
    (table(&columns, left), table(&columns, right))
}

#[test]
fn test_disjunctive_join_with_some_partitions_spilled() {
    init_tracing_for_tests();
    for seed in [2, 17, 31] {
        let (left, right) = random_two_clause_tables(seed);
        let spec = JoinSpecification::builder(
            settings(InputTable::Left, true, &["a", "b"], &["a", "b"], &left),
            settings(InputTable::Right, true, &["a", "b"], &["a", "b"], &right),
        )
        .conjunctive(false)
        .output_row_order(OutputRowOrder::Deterministic)
        .row_key_strategy(RowKeyStrategy::concatenate("|"))
        .build()
        .unwrap();

        let in_memory = run(spec.clone(), HybridHashJoinOptions::default(), NeverLow);
        let expected = all_outputs(&in_memory);
        let keys: BTreeSet<&String> = expected[0].iter().collect();
        assert_eq!(keys.len(), expected[0].len(), "a pair was reported twice");

        let dir = spill_dir();
        for (budget, block_rows) in [(40, 100_000), (60, 4)] {
            let options = HybridHashJoinOptions::default()
                .with_num_partitions(6)
                .with_block_rows(block_rows)
                .with_spill_dir(dir.path());
            let spilled = run(spec.clone(), options, RowBudget::new(budget));
            assert!(spilled.stats().partitions_on_disk > 0);
            assert_eq!(all_outputs(&spilled), expected, "seed {seed}, budget {budget}");
            assert_eq!(spilled.stats().matches, in_memory.stats().matches);
        }
        assert_eq!(spill_file_count(dir.path()), 0);
    }
}

#[test]
fn test_missing_join_values_never_match() {
    init_tracing_for_tests();
    let left = table(
        &[("id", DataType::Int64), ("name", DataType::Utf8)],
        vec![
            DataRow::new("l0", vec![DataCell::Missing, "p".into()]),
            DataRow::new("l1", vec![DataCell::Missing, "q".into()]),
        ],
    );
    let right = table(
        &[("id", DataType::Int64)],
        vec![DataRow::new("r0", vec![1_i64.into()])],
    );

    let outer = JoinSpecification::builder(
        settings(InputTable::Left, true, &["id"], &["id", "name"], &left),
        settings(InputTable::Right, true, &["id"], &["id"], &right),
    )
    .output_row_order(OutputRowOrder::LeftRight)
    .build()
    .unwrap();
    let result = run(outer, HybridHashJoinOptions::default(), NeverLow);
    assert!(result.matches().unwrap().is_empty());
    assert_eq!(rendered(&result.left_unmatched().unwrap()), ["l0,?,p", "l1,?,q"]);
    assert_eq!(rendered(&result.right_unmatched().unwrap()), ["r0,1"]);

    let inner = JoinSpecification::builder(
        settings(InputTable::Left, false, &["id"], &["id", "name"], &left),
        settings(InputTable::Right, false, &["id"], &["id"], &right),
    )
    .build()
    .unwrap();
    let result = run(inner, HybridHashJoinOptions::default(), NeverLow);
    assert_eq!(result.num_matches(), 0);
    assert_eq!(result.num_unmatched(InputTable::Left), 0);
    assert_eq!(result.num_unmatched(InputTable::Right), 0);
}

#[derive(Debug)]
struct UnreadableTable {
    schema: SchemaRef,
}

impl DataTable for UnreadableTable {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn size(&self) -> u64 {
        3
    }

    fn rows(&self) -> RowCursor<'_> {
        panic!("a join that retains nothing must not read its inputs")
    }
}

#[test]
fn test_join_retaining_nothing_reads_no_input() {
    init_tracing_for_tests();
    let unreadable = |side| {
        let table: Arc<dyn DataTable> = Arc::new(UnreadableTable {
            schema: schema(&[("id", DataType::Int64)]),
        });
        JoinTableSettings::for_table(side, false, ["id"], ["id"], table).unwrap()
    };
    let spec = JoinSpecification::builder(unreadable(InputTable::Left), unreadable(InputTable::Right))
        .retain_matched(false)
        .build()
        .unwrap();

    let join = HybridHashJoin::try_new(spec, HybridHashJoinOptions::default()).unwrap();
    assert_eq!(join.phase(), JoinPhase::Init);
    let result = join.join().unwrap();
    assert_eq!(result.stats().hash_side, None);
    assert!(result.matches().unwrap().is_empty());
}

#[test]
fn test_deterministic_order_is_reproducible_and_independent_of_spilling() {
    init_tracing_for_tests();
    let (left, right) = random_tables(7, 150, 220);
    let spec = random_spec(&left, &right, OutputRowOrder::Deterministic);

    let in_memory = all_outputs(&run(spec.clone(), HybridHashJoinOptions::default(), NeverLow));
    let again = all_outputs(&run(spec.clone(), HybridHashJoinOptions::default(), NeverLow));
    assert_eq!(in_memory, again);
    assert!(!in_memory[0].is_empty());

    let dir = spill_dir();
    let budget = HybridHashJoinOptions::default()
        .with_num_partitions(8)
        .with_spill_batch_rows(16)
        .with_spill_dir(dir.path());
    let partly_spilled = run(spec.clone(), budget, RowBudget::new(40));
    assert_eq!(all_outputs(&partly_spilled), in_memory);
    assert!(partly_spilled.stats().partitions_on_disk > 0);

    let blocks = HybridHashJoinOptions::default()
        .with_num_partitions(3)
        .with_block_rows(7)
        .with_spill_dir(dir.path());
    let fully_spilled = run(spec, blocks, AlwaysLow);
    assert_eq!(all_outputs(&fully_spilled), in_memory);
    assert_eq!(fully_spilled.stats().partitions_on_disk, 3);
    assert_eq!(spill_file_count(dir.path()), 0);
}

#[test]
fn test_left_right_order_sorts_by_left_then_right_position() {
    init_tracing_for_tests();
    // Left probes in the first pair of inputs, right probes in the second.
    for (left_rows, right_rows) in [(200, 90), (90, 200)] {
        let (left, right) = random_tables(11, left_rows, right_rows);
        let spec = random_spec(&left, &right, OutputRowOrder::LeftRight);

        let in_memory = run(spec.clone(), HybridHashJoinOptions::default(), NeverLow);
        let positions = matched_positions(&in_memory);
        assert!(!positions.is_empty());
        assert!(positions.is_sorted());

        let dir = spill_dir();
        let options = HybridHashJoinOptions::default()
            .with_num_partitions(5)
            .with_block_rows(10)
            .with_spill_dir(dir.path());
        let spilled = run(spec, options, RowBudget::new(25));
        assert_eq!(all_outputs(&spilled), all_outputs(&in_memory));
    }
}

#[test]
fn test_every_row_is_matched_or_unmatched() {
    init_tracing_for_tests();
    let (left, right) = random_tables(23, 120, 80);
    let dir = spill_dir();
    let options = HybridHashJoinOptions::default()
        .with_num_partitions(6)
        .with_block_rows(5)
        .with_spill_dir(dir.path());
    let result = run(
        random_spec(&left, &right, OutputRowOrder::Arbitrary),
        options,
        RowBudget::new(10),
    );

    let positions = matched_positions(&result);
    let matched_left: BTreeSet<usize> = positions.iter().map(|&(l, _)| l).collect();
    let matched_right: BTreeSet<usize> = positions.iter().map(|&(_, r)| r).collect();
    assert_eq!(
        matched_left.len() + result.num_unmatched(InputTable::Left),
        left.len()
    );
    assert_eq!(
        matched_right.len() + result.num_unmatched(InputTable::Right),
        right.len()
    );

    let unmatched_left = result.left_unmatched().unwrap();
    for row in unmatched_left.as_rows() {
        let position: usize = row.key().as_str()[1..].parse().unwrap();
        assert!(!matched_left.contains(&position));
    }
    assert_eq!(result.stats().matches as usize, positions.len());
}

#[derive(Debug, Default)]
struct ProgressLog {
    fractions: Mutex<Vec<f64>>,
}

impl ExecutionMonitor for ProgressLog {
    fn report_progress(&self, fraction: f64, _message: &str) {
        self.fractions.lock().unwrap().push(fraction);
    }
}

#[test]
fn test_partitions_only_move_to_disk_and_progress_only_grows() {
    init_tracing_for_tests();
    let (left, right) = random_tables(5, 100, 300);
    let dir = spill_dir();
    let options = HybridHashJoinOptions::default()
        .with_num_partitions(8)
        .with_spill_dir(dir.path());

    let budgets = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::clone(&budgets);
    let memory = move |in_memory_rows: usize| {
        observed.lock().unwrap().push(in_memory_rows);
        in_memory_rows >= 12
    };
    let log = Arc::new(ProgressLog::default());

    let result = HybridHashJoin::try_new(random_spec(&left, &right, OutputRowOrder::Arbitrary), options)
        .unwrap()
        .with_memory_monitor(memory)
        .with_execution_monitor(Arc::clone(&log))
        .join()
        .unwrap();

    let stats = result.stats();
    assert_eq!(stats.hash_side, Some(InputTable::Left));
    assert_eq!(stats.hash_rows, 100);
    assert!(stats.partitions_on_disk > 0 && stats.partitions_on_disk <= 8);
    assert!(stats.hash_rows_spilled > 0);
    assert_eq!(budgets.lock().unwrap().len(), 100);

    let fractions = log.fractions.lock().unwrap();
    // At least one report per hash row and per probe row.
    assert!(fractions.len() >= 100 + 300, "{} reports", fractions.len());
    assert!(fractions.is_sorted());
    assert_eq!(fractions.last().copied(), Some(1.0));
}

/// Cancels the join once the hash input is indexed, recording how many spill files existed.
#[derive(Debug)]
struct CancelAfterIndexing {
    token: CancellationToken,
    dir: std::path::PathBuf,
    files_at_cancel: AtomicUsize,
}

impl ExecutionMonitor for CancelAfterIndexing {
    fn report_progress(&self, fraction: f64, _message: &str) {
        if fraction >= 0.3 && !self.token.is_canceled() {
            self.files_at_cancel
                .store(spill_file_count(&self.dir), Ordering::SeqCst);
            self.token.cancel();
        }
    }

    fn check_canceled(&self) -> spilljoin_result::Result<()> {
        self.token.check_canceled()
    }
}

#[test]
fn test_cancellation_removes_spill_files() {
    init_tracing_for_tests();
    let (left, right) = random_tables(3, 60, 60);
    let dir = spill_dir();
    let options = HybridHashJoinOptions::default()
        .with_num_partitions(4)
        .with_spill_dir(dir.path());
    let monitor = Arc::new(CancelAfterIndexing {
        token: CancellationToken::new(),
        dir: dir.path().to_path_buf(),
        files_at_cancel: AtomicUsize::new(0),
    });

    let err = HybridHashJoin::try_new(random_spec(&left, &right, OutputRowOrder::Arbitrary), options)
        .unwrap()
        .with_memory_monitor(AlwaysLow)
        .with_execution_monitor(Arc::clone(&monitor))
        .join()
        .expect_err("join was canceled");

    assert!(matches!(err, Error::Canceled));
    assert!(monitor.files_at_cancel.load(Ordering::SeqCst) > 0);
    assert_eq!(spill_file_count(dir.path()), 0);
}

#[test]
fn test_canceled_before_start() {
    init_tracing_for_tests();
    let (left, right) = scenario_tables();
    let token = CancellationToken::new();
    token.cancel();
    let err = HybridHashJoin::try_new(scenario_spec(&left, &right), HybridHashJoinOptions::default())
        .unwrap()
        .with_execution_monitor(token)
        .join()
        .unwrap_err();
    assert!(err.is_canceled());
}

fn keyed_tables() -> (Arc<RowTable>, Arc<RowTable>) {
    let columns = [("v", DataType::Utf8)];
    let left = table(
        &columns,
        vec![
            DataRow::new("k1", vec!["left one".into()]),
            DataRow::new("k2", vec!["left two".into()]),
        ],
    );
    let right = table(
        &columns,
        vec![
            DataRow::new("k1", vec!["right one".into()]),
            DataRow::new("k3", vec!["right three".into()]),
        ],
    );
    (left, right)
}

#[test]
fn test_keep_original_row_keys_on_row_key_join() {
    init_tracing_for_tests();
    let (left, right) = keyed_tables();
    let spec = JoinSpecification::builder(
        settings(InputTable::Left, true, &["$RowID$"], &["v"], &left),
        settings(InputTable::Right, false, &["$RowID$"], &["v"], &right),
    )
    .row_key_strategy(RowKeyStrategy::KeepOriginal)
    .output_row_order(OutputRowOrder::LeftRight)
    .build()
    .unwrap();
    let result = run(spec, HybridHashJoinOptions::default(), NeverLow);

    assert_eq!(column_names(&result.match_schema()), ["v", "v (#1)"]);
    assert_eq!(rendered(&result.matches().unwrap()), ["k1,left one,right one"]);
    assert_eq!(rendered(&result.single_table().unwrap()), [
        "k1,left one,right one",
        "k2,left two,?"
    ]);
}

#[test]
fn test_keep_original_row_keys_rejected_when_keys_could_repeat() {
    init_tracing_for_tests();
    let (left, right) = keyed_tables();

    // Joining on a column cannot guarantee equal keys for matched rows.
    let by_column = JoinSpecification::builder(
        settings(InputTable::Left, true, &["v"], &["v"], &left),
        settings(InputTable::Right, false, &["v"], &["v"], &right),
    )
    .row_key_strategy(RowKeyStrategy::KeepOriginal)
    .build();
    assert!(matches!(by_column, Err(Error::InvalidArgumentError(_))));

    // Both unmatched sides in one table always risk duplicates.
    let single_table = JoinSpecification::builder(
        settings(InputTable::Left, true, &["$RowID$"], &["v"], &left),
        settings(InputTable::Right, true, &["$RowID$"], &["v"], &right),
    )
    .row_key_strategy(RowKeyStrategy::KeepOriginal)
    .unmatched_output(UnmatchedOutput::SingleTable)
    .build();
    assert!(matches!(single_table, Err(Error::InvalidArgumentError(_))));

    // Separate tables are fine, but the result refuses to combine them.
    let separate = JoinSpecification::builder(
        settings(InputTable::Left, true, &["$RowID$"], &["v"], &left),
        settings(InputTable::Right, true, &["$RowID$"], &["v"], &right),
    )
    .row_key_strategy(RowKeyStrategy::KeepOriginal)
    .build()
    .unwrap();
    let result = run(separate, HybridHashJoinOptions::default(), NeverLow);
    assert_eq!(rendered(&result.left_unmatched().unwrap()), ["k2,left two"]);
    assert_eq!(rendered(&result.right_unmatched().unwrap()), ["k3,right three"]);
    assert!(matches!(
        result.single_table(),
        Err(Error::InvalidArgumentError(_))
    ));
}

#[test]
fn test_merged_join_columns_in_single_table() {
    init_tracing_for_tests();
    let left = table(
        &[("id", DataType::Int64), ("name", DataType::Utf8)],
        vec![
            DataRow::new("l0", vec![1_i64.into(), "one".into()]),
            DataRow::new("l1", vec![2_i64.into(), "two".into()]),
        ],
    );
    let right = table(
        &[("key", DataType::Int64), ("score", DataType::Float64)],
        vec![
            DataRow::new("r0", vec![1_i64.into(), 0.5_f64.into()]),
            DataRow::new("r1", vec![3_i64.into(), 1.5_f64.into()]),
        ],
    );
    let spec = JoinSpecification::builder(
        settings(InputTable::Left, true, &["id"], &["name"], &left),
        settings(InputTable::Right, true, &["key"], &["key", "score"], &right),
    )
    .merge_join_columns(true)
    .unmatched_output(UnmatchedOutput::SingleTable)
    .row_key_strategy(RowKeyStrategy::Sequence)
    .output_row_order(OutputRowOrder::LeftRight)
    .build()
    .unwrap();
    let result = run(spec, HybridHashJoinOptions::default(), NeverLow);

    assert_eq!(column_names(&result.match_schema()), ["id=key", "name", "score"]);
    let JoinOutput::SingleTable(table) = result.output().unwrap() else {
        panic!("expected a single output table");
    };
    assert_eq!(rendered(&table), [
        "Row0,1,one,0.5",
        "Row1,2,two,?",
        "Row2,3,?,1.5"
    ]);
    // Unmatched tables keep the original layout of each side.
    assert_eq!(rendered(&result.right_unmatched().unwrap()), ["r1,3,1.5"]);
}

#[test]
fn test_column_names_are_disambiguated() {
    init_tracing_for_tests();
    let columns = [("id", DataType::Int64), ("v", DataType::Utf8)];
    let left = table(&columns, Vec::new());
    let right = table(&columns, Vec::new());
    let build = |disambiguate: fn(&str) -> String| {
        JoinSpecification::builder(
            settings(InputTable::Left, false, &["id"], &["id", "v"], &left),
            settings(InputTable::Right, false, &["id"], &["id", "v"], &right),
        )
        .column_name_disambiguator(disambiguate)
        .build()
        .unwrap()
    };

    let suffixed = build(|name| format!("{name}_r"));
    assert_eq!(
        column_names(&suffixed.spec_for_match_table()),
        ["id", "v", "id_r", "v_r"]
    );
    // A renaming that changes nothing falls back to doubling the name.
    let unchanged = build(|name| format!(" {name} "));
    assert_eq!(
        column_names(&unchanged.spec_for_match_table()),
        ["id", "v", "idid", "vv"]
    );

    let result = run(suffixed, HybridHashJoinOptions::default(), NeverLow);
    assert!(result.matches().unwrap().is_empty());
    assert_eq!(column_names(&result.match_schema()), ["id", "v", "id_r", "v_r"]);
}

#[test]
fn test_comparison_modes() {
    init_tracing_for_tests();
    let left = table(
        &[("n", DataType::Int32), ("s", DataType::Utf8)],
        vec![DataRow::new("l0", vec![1_i32.into(), "1".into()])],
    );
    let right = table(
        &[("n", DataType::Int64)],
        vec![DataRow::new("r0", vec![1_i64.into()])],
    );
    let count_matches = |left_join: &str, mode| {
        let spec = JoinSpecification::builder(
            settings(InputTable::Left, false, &[left_join], &["s"], &left),
            settings(InputTable::Right, false, &["n"], &["n"], &right),
        )
        .comparison_mode(mode)
        .build()
        .unwrap();
        run(spec, HybridHashJoinOptions::default(), NeverLow).num_matches()
    };

    assert_eq!(count_matches("n", DataCellComparisonMode::Strict), 0);
    assert_eq!(count_matches("n", DataCellComparisonMode::NumericAsLong), 1);
    assert_eq!(count_matches("s", DataCellComparisonMode::Strict), 0);
    assert_eq!(count_matches("s", DataCellComparisonMode::AsString), 1);
}

#[test]
fn test_numeric_as_long_keeps_floats_strict() {
    init_tracing_for_tests();
    let left = table(
        &[("f", DataType::Float64), ("flag", DataType::Boolean)],
        vec![
            DataRow::new("l0", vec![3.9_f64.into(), true.into()]),
            DataRow::new("l1", vec![3.0_f64.into(), false.into()]),
        ],
    );
    let right = table(
        &[("n", DataType::Int64)],
        vec![
            DataRow::new("r0", vec![3_i64.into()]),
            DataRow::new("r1", vec![1_i64.into()]),
        ],
    );
    let matched_keys = |left_join: &str, mode, spill: bool| {
        let spec = JoinSpecification::builder(
            settings(InputTable::Left, false, &[left_join], &["f"], &left),
            settings(InputTable::Right, false, &["n"], &["n"], &right),
        )
        .comparison_mode(mode)
        .row_key_strategy(RowKeyStrategy::concatenate("_"))
        .build()
        .unwrap();
        let result = if spill {
            let dir = spill_dir();
            let options = HybridHashJoinOptions::default()
                .with_num_partitions(1)
                .with_spill_dir(dir.path());
            run(spec, options, AlwaysLow)
        } else {
            run(spec, HybridHashJoinOptions::default(), NeverLow)
        };
        rendered(&result.matches().unwrap())
    };

    for spill in [false, true] {
        assert!(matched_keys("f", DataCellComparisonMode::NumericAsLong, spill).is_empty());
        assert!(matched_keys("flag", DataCellComparisonMode::Strict, spill).is_empty());
        assert_eq!(
            matched_keys("flag", DataCellComparisonMode::NumericAsLong, spill),
            ["l0_r1,3.9,1"]
        );
    }
}

#[test]
fn test_row_key_strategies() {
    init_tracing_for_tests();
    let (left, right) = keyed_tables();
    let keys = |strategy: RowKeyStrategy| {
        let spec = JoinSpecification::builder(
            settings(InputTable::Left, true, &["$RowID$"], &["v"], &left),
            settings(InputTable::Right, true, &["$RowID$"], &["v"], &right),
        )
        .row_key_strategy(strategy)
        .output_row_order(OutputRowOrder::LeftRight)
        .build()
        .unwrap();
        let result = run(spec, HybridHashJoinOptions::default(), NeverLow);
        result
            .single_table()
            .unwrap()
            .as_rows()
            .iter()
            .map(|row| row.key().to_string())
            .collect::<Vec<_>>()
    };

    assert_eq!(keys(RowKeyStrategy::default()), ["Row0", "Row1", "Row2"]);
    assert_eq!(keys(RowKeyStrategy::concatenate("_")), ["k1_k1", "k2_?", "?_k3"]);
    assert_eq!(keys(RowKeyStrategy::concatenate("+")), ["k1+k1", "k2+?", "?+k3"]);
    assert_eq!(keys(RowKeyStrategy::Sequence), ["Row0", "Row1", "Row2"]);
    let custom = RowKeyStrategy::custom(|left, right| {
        let side = if right.is_none() { "left" } else if left.is_none() { "right" } else { "both" };
        format!("{side}:{}", left.or(right).map_or("", |key| key.as_str())).into()
    });
    assert_eq!(keys(custom), ["both:k1", "left:k2", "right:k3"]);
}

#[test]
fn test_invalid_joins_are_rejected() {
    init_tracing_for_tests();
    let (left, right) = scenario_tables();

    let options = HybridHashJoinOptions::default().with_block_rows(0);
    let err = HybridHashJoin::try_new(scenario_spec(&left, &right), options).unwrap_err();
    assert!(matches!(err, Error::InvalidArgumentError(_)));

    let unbound = JoinTableSettings::new(
        InputTable::Left,
        false,
        ["id"],
        ["id"],
        left.schema(),
    )
    .unwrap();
    let spec = JoinSpecification::builder(
        unbound,
        settings(InputTable::Right, false, &["id"], &["val"], &right),
    )
    .build()
    .unwrap();
    let err = HybridHashJoin::try_new(spec, HybridHashJoinOptions::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgumentError(_)));

    let err = JoinTableSettings::for_table(
        InputTable::Left,
        false,
        ["nope"],
        ["id"],
        Arc::clone(&left) as Arc<dyn DataTable>,
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("nope"), "{message}");

    let swapped = JoinSpecification::builder(
        settings(InputTable::Right, false, &["id"], &["val"], &right),
        settings(InputTable::Left, false, &["id"], &["id"], &left),
    )
    .build();
    assert!(matches!(swapped, Err(Error::InvalidArgumentError(_))));
}

#[test]
fn test_outputs_convert_to_record_batches() {
    init_tracing_for_tests();
    let (left, right) = scenario_tables();
    let result = run(
        scenario_spec(&left, &right),
        HybridHashJoinOptions::default(),
        NeverLow,
    );
    let batch = result.matches().unwrap().to_record_batch().unwrap();
    assert_eq!(batch.num_rows(), 1);
    let round_trip = RowTable::from_record_batch(&batch).unwrap();
    assert_eq!(rendered(&round_trip), ["l0_r0,a,x"]);
}
