//! Hash partitions of a join and their migration from memory to disk.
//!
//! Partitions are numbered `0..n`. A single boundary cursor splits them: partitions below it
//! live on disk, partitions at or above it in memory. Under memory pressure the lowest
//! in-memory partition is spilled and the cursor moves up by one; it never moves back.

use std::mem;

use spilljoin_result::{Error, Result};
use spilljoin_table::{DataRow, RowCodec};

use crate::container::JoinContainer;
use crate::disk_bucket::{DiskBucket, SpillConfig};
use crate::hash_index::HashIndex;
use crate::options::HybridHashJoinOptions;
use crate::settings::InputTable;
use crate::specification::JoinSpecification;
use crate::tuple::JoinTuple;

/// Storage of the hash rows of one partition.
pub(crate) enum PartitionSlot {
    /// In memory, no rows yet.
    Empty,
    InMemory(HashIndex),
    OnDisk(DiskBucket),
}

/// The hash and probe buckets of one spilled partition, ready to be joined.
pub(crate) struct DiskPartition {
    pub partition: usize,
    pub hash: DiskBucket,
    pub probe: Option<DiskBucket>,
}

pub(crate) struct PartitionManager {
    hash_side: InputTable,
    conjunctive: bool,
    num_clauses: usize,
    hash_slots: Vec<PartitionSlot>,
    probe_buckets: Vec<Option<DiskBucket>>,
    /// Partitions below this index are on disk.
    first_in_memory: usize,
    in_memory_rows: usize,
    hash_codec: RowCodec,
    probe_codec: RowCodec,
    spill: SpillConfig,
    hash_rows_spilled: u64,
    probe_rows_spilled: u64,
}

impl PartitionManager {
    /// Partitions for joining over the (condensed) layouts of `spec`.
    pub(crate) fn new(
        spec: &JoinSpecification,
        hash_side: InputTable,
        options: &HybridHashJoinOptions,
    ) -> Result<Self> {
        let num_partitions = options.effective_num_partitions();
        Ok(Self {
            hash_side,
            conjunctive: spec.is_effectively_conjunctive(),
            num_clauses: spec.num_clauses(),
            hash_slots: (0..num_partitions).map(|_| PartitionSlot::Empty).collect(),
            probe_buckets: (0..num_partitions).map(|_| None).collect(),
            first_in_memory: 0,
            in_memory_rows: 0,
            hash_codec: RowCodec::new(spec.settings(hash_side).schema().clone())?,
            probe_codec: RowCodec::new(spec.settings(hash_side.other()).schema().clone())?,
            spill: SpillConfig::new(options.spill_dir(), options.spill_batch_rows),
            hash_rows_spilled: 0,
            probe_rows_spilled: 0,
        })
    }

    pub(crate) fn num_partitions(&self) -> usize {
        self.hash_slots.len()
    }

    pub(crate) fn num_partitions_on_disk(&self) -> usize {
        self.first_in_memory
    }

    /// Hash rows currently indexed in memory.
    pub(crate) fn in_memory_rows(&self) -> usize {
        self.in_memory_rows
    }

    pub(crate) fn hash_rows_spilled(&self) -> u64 {
        self.hash_rows_spilled
    }

    pub(crate) fn probe_rows_spilled(&self) -> u64 {
        self.probe_rows_spilled
    }

    /// Partitions a row with this tuple belongs to, ascending and without duplicates.
    fn target_partitions(&self, tuple: &JoinTuple) -> Vec<usize> {
        let n = self.hash_slots.len() as u64;
        if self.conjunctive {
            return vec![(tuple.conjunctive_hash() % n) as usize];
        }
        let mut partitions: Vec<usize> = (0..self.num_clauses)
            .map(|clause| (tuple.disjunctive_hash(clause) % n) as usize)
            .collect();
        partitions.sort_unstable();
        partitions.dedup();
        partitions
    }

    /// Spill the lowest partition still in memory. Returns `false` if all are on disk already.
    pub(crate) fn flush_next_partition(&mut self) -> Result<bool> {
        let partition = self.first_in_memory;
        let Some(slot) = self.hash_slots.get_mut(partition) else {
            return Ok(false);
        };

        let mut bucket = self.spill.bucket(&self.hash_codec);
        match mem::replace(slot, PartitionSlot::Empty) {
            PartitionSlot::Empty => {}
            PartitionSlot::InMemory(index) => {
                let rows = index.len();
                index.spill_to_disk(&mut bucket)?;
                self.in_memory_rows -= rows;
                self.hash_rows_spilled += rows as u64;
            }
            PartitionSlot::OnDisk(_) => {
                return Err(Error::Internal(format!(
                    "partition {partition} at the memory boundary is already on disk"
                )));
            }
        }
        *slot = PartitionSlot::OnDisk(bucket);
        self.first_in_memory += 1;
        tracing::trace!(
            partition,
            in_memory_rows = self.in_memory_rows,
            "spilled hash partition"
        );
        Ok(true)
    }

    /// Index a hash row in memory or append it to disk, for each of its partitions.
    pub(crate) fn add_hash_row(
        &mut self,
        tuple: &JoinTuple,
        row: DataRow,
        offset: u64,
    ) -> Result<()> {
        for partition in self.target_partitions(tuple) {
            match &mut self.hash_slots[partition] {
                PartitionSlot::OnDisk(bucket) => {
                    bucket.add(row.clone())?;
                    self.hash_rows_spilled += 1;
                }
                PartitionSlot::InMemory(index) => {
                    index.add_row(tuple, row.clone(), offset);
                    self.in_memory_rows += 1;
                }
                slot @ PartitionSlot::Empty => {
                    let mut index =
                        HashIndex::new(self.hash_side, self.conjunctive, self.num_clauses);
                    index.add_row(tuple, row.clone(), offset);
                    *slot = PartitionSlot::InMemory(index);
                    self.in_memory_rows += 1;
                }
            }
        }
        Ok(())
    }

    /// Probe the in-memory partitions of a probe row and defer the rest to disk.
    ///
    /// A row that matched nothing in memory is reported unmatched unless all of its partitions
    /// are on disk, in which case the disk join decides.
    pub(crate) fn probe_row(
        &mut self,
        tuple: &JoinTuple,
        row: &DataRow,
        offset: u64,
        container: &mut JoinContainer,
    ) -> Result<()> {
        let mut probed_in_memory = false;
        let mut matched = false;
        for partition in self.target_partitions(tuple) {
            if partition < self.first_in_memory {
                let bucket = self.probe_buckets[partition]
                    .get_or_insert_with(|| self.spill.bucket(&self.probe_codec));
                bucket.add(row.clone())?;
                self.probe_rows_spilled += 1;
                continue;
            }
            probed_in_memory = true;
            if let PartitionSlot::InMemory(index) = &mut self.hash_slots[partition] {
                matched |= index.probe(tuple, row, offset, container);
            }
        }
        if probed_in_memory && !matched {
            container.add_unmatched(self.hash_side.other(), row, offset);
        }
        Ok(())
    }

    pub(crate) fn close_hash_buckets(&mut self) -> Result<()> {
        for slot in &mut self.hash_slots[..self.first_in_memory] {
            if let PartitionSlot::OnDisk(bucket) = slot {
                bucket.close()?;
            }
        }
        Ok(())
    }

    pub(crate) fn close_probe_buckets(&mut self) -> Result<()> {
        for bucket in self.probe_buckets.iter_mut().flatten() {
            bucket.close()?;
        }
        Ok(())
    }

    /// Emit the never-matched rows of every in-memory partition, one sorted chunk each, and
    /// release the indexes.
    pub(crate) fn emit_in_memory_unmatched(&mut self, container: &mut JoinContainer) {
        for slot in &mut self.hash_slots[self.first_in_memory..] {
            if let PartitionSlot::InMemory(index) = mem::replace(slot, PartitionSlot::Empty) {
                index.emit_unmatched(container);
                container.end_sorted_chunk();
            }
        }
        self.in_memory_rows = 0;
    }

    /// Hand out the bucket pairs of all spilled partitions, lowest partition first.
    pub(crate) fn take_disk_partitions(&mut self) -> Result<Vec<DiskPartition>> {
        let mut partitions = Vec::with_capacity(self.first_in_memory);
        for partition in 0..self.first_in_memory {
            let PartitionSlot::OnDisk(hash) =
                mem::replace(&mut self.hash_slots[partition], PartitionSlot::Empty)
            else {
                return Err(Error::Internal(format!(
                    "partition {partition} below the memory boundary is not on disk"
                )));
            };
            if !hash.is_closed() {
                return Err(Error::Internal(format!(
                    "hash bucket of partition {partition} was not closed"
                )));
            }
            partitions.push(DiskPartition {
                partition,
                hash,
                probe: self.probe_buckets[partition].take(),
            });
        }
        Ok(partitions)
    }
}
