//! In-memory hash index over the rows of one partition of the hash input.

use rustc_hash::FxHashMap;
use spilljoin_result::Result;
use spilljoin_table::{DataCell, DataRow};

use crate::container::JoinContainer;
use crate::disk_bucket::DiskBucket;
use crate::settings::InputTable;
use crate::tuple::JoinTuple;

#[derive(Debug)]
struct IndexedRow {
    row: DataRow,
    offset: u64,
    matched: bool,
}

#[derive(Debug)]
enum Lookup {
    /// All clauses must match: rows keyed by their whole join tuple.
    Conjunctive(FxHashMap<JoinTuple, Vec<usize>>),
    /// Any clause may match: one map per clause keyed by that clause's value.
    Disjunctive(Vec<FxHashMap<DataCell, Vec<usize>>>),
}

/// Hash rows of one partition, probed by rows of the other input.
#[derive(Debug)]
pub(crate) struct HashIndex {
    hash_side: InputTable,
    rows: Vec<IndexedRow>,
    lookup: Lookup,
}

impl HashIndex {
    pub(crate) fn new(hash_side: InputTable, conjunctive: bool, num_clauses: usize) -> Self {
        let lookup = if conjunctive {
            Lookup::Conjunctive(FxHashMap::default())
        } else {
            Lookup::Disjunctive(vec![FxHashMap::default(); num_clauses])
        };
        Self {
            hash_side,
            rows: Vec::new(),
            lookup,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn add_row(&mut self, tuple: &JoinTuple, row: DataRow, offset: u64) {
        let position = self.rows.len();
        self.rows.push(IndexedRow {
            row,
            offset,
            matched: false,
        });
        match &mut self.lookup {
            Lookup::Conjunctive(map) => map.entry(tuple.clone()).or_default().push(position),
            Lookup::Disjunctive(maps) => {
                for (clause, map) in maps.iter_mut().enumerate() {
                    map.entry(tuple.value(clause).clone())
                        .or_default()
                        .push(position);
                }
            }
        }
    }

    /// Emit a match for every indexed row that matches the probe row, in insertion order.
    ///
    /// Returns whether anything matched. The caller decides what an unmatched probe row means.
    pub(crate) fn probe(
        &mut self,
        tuple: &JoinTuple,
        probe_row: &DataRow,
        probe_offset: u64,
        container: &mut JoinContainer,
    ) -> bool {
        let Self {
            hash_side,
            rows,
            lookup,
        } = self;
        let mut emit = |position: usize| {
            let indexed = &mut rows[position];
            indexed.matched = true;
            match hash_side {
                InputTable::Left => {
                    container.add_match(&indexed.row, indexed.offset, probe_row, probe_offset)
                }
                InputTable::Right => {
                    container.add_match(probe_row, probe_offset, &indexed.row, indexed.offset)
                }
            }
        };

        match lookup {
            Lookup::Conjunctive(map) => {
                let Some(positions) = map.get(tuple) else {
                    return false;
                };
                for &position in positions.iter() {
                    emit(position);
                }
                !positions.is_empty()
            }
            Lookup::Disjunctive(maps) => {
                // A row matching several clauses is reported once.
                let mut positions: Vec<usize> = maps
                    .iter()
                    .enumerate()
                    .filter_map(|(clause, map)| map.get(tuple.value(clause)))
                    .flatten()
                    .copied()
                    .collect();
                positions.sort_unstable();
                positions.dedup();
                for &position in positions.iter() {
                    emit(position);
                }
                !positions.is_empty()
            }
        }
    }

    /// Emit every row that never matched, in insertion order. Call after all probing is done.
    pub(crate) fn emit_unmatched(self, container: &mut JoinContainer) {
        for indexed in self.rows.iter().filter(|indexed| !indexed.matched) {
            container.add_unmatched(self.hash_side, &indexed.row, indexed.offset);
        }
    }

    /// Move all rows, in insertion order, into `bucket`.
    pub(crate) fn spill_to_disk(self, bucket: &mut DiskBucket) -> Result<()> {
        for indexed in self.rows {
            bucket.add(indexed.row)?;
        }
        Ok(())
    }
}
