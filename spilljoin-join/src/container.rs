//! Collection of join results in the requested output order.
//!
//! The join emits matches and unmatched rows through a [`JoinContainer`] while it runs. The
//! container filters what is not retained, removes the duplicates a disjunctive join produces,
//! and hands the rest to a [`ResultCollector`] that establishes the output order. Rows are kept
//! in the layout they were joined in; projection to output rows happens in [`crate::JoinResult`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::mem;

use rustc_hash::FxHashSet;
use spilljoin_table::DataRow;

use crate::settings::InputTable;
use crate::specification::{JoinSpecification, OutputRowOrder};

/// A left row and a right row that satisfy the join predicate.
#[derive(Debug, Clone)]
pub(crate) struct MatchedPair {
    pub left: DataRow,
    pub left_offset: u64,
    pub right: DataRow,
    pub right_offset: u64,
}

/// Everything a join produced, in output order.
#[derive(Debug, Default)]
pub(crate) struct CollectedRows {
    pub matches: Vec<MatchedPair>,
    pub unmatched: [Vec<DataRow>; 2],
}

/// Establishes the order of the results.
///
/// The join emits results in runs: each run (ended by `end_sorted_chunk`) is sorted by the
/// deterministic order on its own, but runs interleave arbitrarily.
pub(crate) trait ResultCollector {
    fn emit_match(&mut self, pair: MatchedPair);

    fn emit_unmatched(&mut self, side: InputTable, row: DataRow, offset: u64);

    fn end_sorted_chunk(&mut self) {}

    fn finalize(self: Box<Self>) -> CollectedRows;
}

/// Pick the collector for an output order.
pub(crate) fn collector_for(
    order: OutputRowOrder,
    probe_side: InputTable,
) -> Box<dyn ResultCollector> {
    match order {
        OutputRowOrder::Arbitrary => Box::new(UnorderedCollector::default()),
        OutputRowOrder::Deterministic => Box::new(SortedChunkCollector::new(probe_side)),
        // Probe order is left order, so the sorted chunks already come out left-right.
        OutputRowOrder::LeftRight if probe_side.is_left() => {
            Box::new(SortedChunkCollector::new(probe_side))
        }
        OutputRowOrder::LeftRight => Box::new(LeftRightCollector::default()),
    }
}

/// Keeps results in emission order.
#[derive(Debug, Default)]
pub(crate) struct UnorderedCollector {
    rows: CollectedRows,
}

impl ResultCollector for UnorderedCollector {
    fn emit_match(&mut self, pair: MatchedPair) {
        self.rows.matches.push(pair);
    }

    fn emit_unmatched(&mut self, side: InputTable, row: DataRow, _offset: u64) {
        self.rows.unmatched[side.index()].push(row);
    }

    fn finalize(self: Box<Self>) -> CollectedRows {
        self.rows
    }
}

/// Merges the sorted runs emitted by the join.
///
/// Matches are ordered by (probe offset, hash offset), unmatched rows by their offset.
#[derive(Debug)]
pub(crate) struct SortedChunkCollector {
    probe_side: InputTable,
    matches: SortedRuns<(u64, u64), MatchedPair>,
    unmatched: [SortedRuns<u64, DataRow>; 2],
}

impl SortedChunkCollector {
    pub(crate) fn new(probe_side: InputTable) -> Self {
        Self {
            probe_side,
            matches: SortedRuns::default(),
            unmatched: [SortedRuns::default(), SortedRuns::default()],
        }
    }
}

impl ResultCollector for SortedChunkCollector {
    fn emit_match(&mut self, pair: MatchedPair) {
        let key = if self.probe_side.is_left() {
            (pair.left_offset, pair.right_offset)
        } else {
            (pair.right_offset, pair.left_offset)
        };
        self.matches.push(key, pair);
    }

    fn emit_unmatched(&mut self, side: InputTable, row: DataRow, offset: u64) {
        self.unmatched[side.index()].push(offset, row);
    }

    fn end_sorted_chunk(&mut self) {
        self.matches.end_run();
        for runs in &mut self.unmatched {
            runs.end_run();
        }
    }

    fn finalize(self: Box<Self>) -> CollectedRows {
        let Self { matches, unmatched, .. } = *self;
        let [left, right] = unmatched;
        CollectedRows {
            matches: matches.merge(),
            unmatched: [left.merge(), right.merge()],
        }
    }
}

/// Sorts all results once at the end: matches by (left offset, right offset).
#[derive(Debug, Default)]
pub(crate) struct LeftRightCollector {
    matches: Vec<((u64, u64), MatchedPair)>,
    unmatched: [Vec<(u64, DataRow)>; 2],
}

impl ResultCollector for LeftRightCollector {
    fn emit_match(&mut self, pair: MatchedPair) {
        self.matches
            .push(((pair.left_offset, pair.right_offset), pair));
    }

    fn emit_unmatched(&mut self, side: InputTable, row: DataRow, offset: u64) {
        self.unmatched[side.index()].push((offset, row));
    }

    fn finalize(self: Box<Self>) -> CollectedRows {
        let Self {
            mut matches,
            unmatched,
        } = *self;
        matches.sort_by_key(|(key, _)| *key);
        let unmatched = unmatched.map(|mut rows| {
            rows.sort_by_key(|(offset, _)| *offset);
            rows.into_iter().map(|(_, row)| row).collect::<Vec<_>>()
        });
        CollectedRows {
            matches: matches.into_iter().map(|(_, pair)| pair).collect(),
            unmatched,
        }
    }
}

/// Keyed items collected in runs that are merged by key at the end.
#[derive(Debug)]
struct SortedRuns<K, T> {
    runs: Vec<Vec<(K, T)>>,
    current: Vec<(K, T)>,
}

impl<K, T> Default for SortedRuns<K, T> {
    fn default() -> Self {
        Self {
            runs: Vec::new(),
            current: Vec::new(),
        }
    }
}

impl<K: Ord + Copy, T> SortedRuns<K, T> {
    fn push(&mut self, key: K, item: T) {
        self.current.push((key, item));
    }

    fn end_run(&mut self) {
        if !self.current.is_empty() {
            self.runs.push(mem::take(&mut self.current));
        }
    }

    /// K-way merge of all runs. Equal keys keep run order.
    fn merge(mut self) -> Vec<T> {
        self.end_run();
        for run in &mut self.runs {
            if !run.is_sorted_by_key(|(key, _)| *key) {
                run.sort_by_key(|(key, _)| *key);
            }
        }

        if self.runs.len() <= 1 {
            return self
                .runs
                .pop()
                .map(|run| run.into_iter().map(|(_, item)| item).collect())
                .unwrap_or_default();
        }

        let total = self.runs.iter().map(Vec::len).sum();
        let mut merged = Vec::with_capacity(total);
        let mut cursors: Vec<_> = self.runs.into_iter().map(Vec::into_iter).collect();
        let mut heads: Vec<Option<T>> = Vec::with_capacity(cursors.len());
        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (run, cursor) in cursors.iter_mut().enumerate() {
            let head = cursor.next().map(|(key, item)| {
                heap.push(Reverse((key, run)));
                item
            });
            heads.push(head);
        }

        while let Some(Reverse((_, run))) = heap.pop() {
            if let Some(item) = heads[run].take() {
                merged.push(item);
            }
            if let Some((key, item)) = cursors[run].next() {
                heap.push(Reverse((key, run)));
                heads[run] = Some(item);
            }
        }
        merged
    }
}

/// Receives the results of a join while it runs.
///
/// Under a disjunctive predicate a pair of rows can match through several partitions, and a
/// row can look unmatched in one partition while matching in another. The container therefore
/// drops repeated pairs and holds back unmatched rows until [`JoinContainer::finish`], where
/// only rows that never matched anywhere are released.
pub(crate) struct JoinContainer {
    retain_matched: bool,
    retain_unmatched: [bool; 2],
    deduplicate: bool,
    collector: Box<dyn ResultCollector>,
    seen_matches: FxHashSet<(u64, u64)>,
    seen_unmatched: [FxHashSet<u64>; 2],
    matched_offsets: [FxHashSet<u64>; 2],
    deferred_unmatched: [Vec<(u64, DataRow)>; 2],
    num_matches: u64,
}

impl JoinContainer {
    pub(crate) fn new(spec: &JoinSpecification, probe_side: InputTable) -> Self {
        Self {
            retain_matched: spec.retains_matched(),
            retain_unmatched: InputTable::BOTH.map(|side| spec.retains_unmatched(side)),
            deduplicate: !spec.is_effectively_conjunctive(),
            collector: collector_for(spec.output_row_order(), probe_side),
            seen_matches: FxHashSet::default(),
            seen_unmatched: Default::default(),
            matched_offsets: Default::default(),
            deferred_unmatched: Default::default(),
            num_matches: 0,
        }
    }

    pub(crate) fn add_match(
        &mut self,
        left: &DataRow,
        left_offset: u64,
        right: &DataRow,
        right_offset: u64,
    ) {
        if self.deduplicate {
            if !self.seen_matches.insert((left_offset, right_offset)) {
                return;
            }
            for (side, offset) in [(0, left_offset), (1, right_offset)] {
                if self.retain_unmatched[side] {
                    self.matched_offsets[side].insert(offset);
                }
            }
        }

        self.num_matches += 1;
        if self.retain_matched {
            self.collector.emit_match(MatchedPair {
                left: left.clone(),
                left_offset,
                right: right.clone(),
                right_offset,
            });
        }
    }

    pub(crate) fn add_unmatched(&mut self, side: InputTable, row: &DataRow, offset: u64) {
        let idx = side.index();
        if !self.retain_unmatched[idx] {
            return;
        }
        if self.deduplicate {
            if self.seen_unmatched[idx].insert(offset) {
                self.deferred_unmatched[idx].push((offset, row.clone()));
            }
            return;
        }
        self.collector.emit_unmatched(side, row.clone(), offset);
    }

    pub(crate) fn end_sorted_chunk(&mut self) {
        self.collector.end_sorted_chunk();
    }

    /// Number of distinct matching pairs seen so far, retained or not.
    pub(crate) fn num_matches(&self) -> u64 {
        self.num_matches
    }

    pub(crate) fn finish(mut self) -> CollectedRows {
        for side in InputTable::BOTH {
            let idx = side.index();
            let mut candidates = mem::take(&mut self.deferred_unmatched[idx]);
            candidates.retain(|(offset, _)| !self.matched_offsets[idx].contains(offset));
            candidates.sort_by_key(|(offset, _)| *offset);
            for (offset, row) in candidates {
                self.collector.emit_unmatched(side, row, offset);
            }
            self.collector.end_sorted_chunk();
        }
        self.collector.finalize()
    }
}
