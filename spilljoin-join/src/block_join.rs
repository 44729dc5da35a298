//! Join of one spilled partition: its hash bucket against its probe bucket.
//!
//! The hash bucket is indexed in blocks of at most `block_rows` rows, and the probe bucket is
//! streamed once per block. With a single block, unmatched probe rows are known right away;
//! with several, a probe row is unmatched only if no block matched it, which takes one more
//! pass over the probe bucket.

use spilljoin_result::{Error, Result};
use spilljoin_table::DataRow;

use crate::container::JoinContainer;
use crate::hash_index::HashIndex;
use crate::monitor::PhaseProgress;
use crate::partitions::DiskPartition;
use crate::settings::{InputTable, JoinTableSettings};
use crate::specification::JoinSpecification;
use crate::tuple::JoinTuple;

pub(crate) fn join_disk_partition(
    partition: &DiskPartition,
    spec: &JoinSpecification,
    hash_side: InputTable,
    block_rows: usize,
    container: &mut JoinContainer,
    progress: &PhaseProgress<'_>,
) -> Result<()> {
    let probe_side = hash_side.other();
    let hash_settings = spec.settings(hash_side);
    let probe_settings = spec.settings(probe_side);

    if partition.hash.is_empty() {
        if let Some(probe) = &partition.probe {
            for (position, row) in probe.rows()?.enumerate() {
                progress.check_canceled()?;
                let row = row?;
                let offset = row_offset(probe_settings, &row, position);
                container.add_unmatched(probe_side, &row, offset);
            }
        }
        container.end_sorted_chunk();
        return Ok(());
    }

    let single_block = partition.hash.num_rows() <= block_rows as u64;
    let mut probe_matched = match (&partition.probe, single_block) {
        (Some(probe), false) => vec![false; probe.num_rows() as usize],
        _ => Vec::new(),
    };

    let mut hash_rows = partition.hash.rows()?.enumerate();
    let mut blocks = 0_usize;
    loop {
        let mut index = HashIndex::new(
            hash_side,
            spec.is_effectively_conjunctive(),
            spec.num_clauses(),
        );
        for (position, row) in hash_rows.by_ref().take(block_rows) {
            progress.check_canceled()?;
            let row = row?;
            let offset = row_offset(hash_settings, &row, position);
            let tuple = spilled_tuple(hash_settings, &row, spec)?;
            index.add_row(&tuple, row, offset);
        }
        if index.is_empty() {
            break;
        }
        blocks += 1;

        if let Some(probe) = &partition.probe {
            for (position, row) in probe.rows()?.enumerate() {
                progress.check_canceled()?;
                let row = row?;
                let offset = row_offset(probe_settings, &row, position);
                let tuple = spilled_tuple(probe_settings, &row, spec)?;
                let matched = index.probe(&tuple, &row, offset, container);
                if single_block {
                    if !matched {
                        container.add_unmatched(probe_side, &row, offset);
                    }
                } else if matched {
                    probe_matched[position] = true;
                }
            }
        }

        index.emit_unmatched(container);
        container.end_sorted_chunk();
        if single_block {
            break;
        }
    }

    if !single_block && let Some(probe) = &partition.probe {
        for (position, row) in probe.rows()?.enumerate() {
            if probe_matched[position] {
                continue;
            }
            progress.check_canceled()?;
            let row = row?;
            let offset = row_offset(probe_settings, &row, position);
            container.add_unmatched(probe_side, &row, offset);
        }
        container.end_sorted_chunk();
    }

    tracing::debug!(
        partition = partition.partition,
        hash_rows = partition.hash.num_rows(),
        probe_rows = partition.probe.as_ref().map_or(0, |probe| probe.num_rows()),
        blocks,
        "joined spilled partition"
    );
    Ok(())
}

/// Offset of a spilled row in its input, falling back to its position in the bucket when the
/// layout carries no offsets.
fn row_offset(settings: &JoinTableSettings, row: &DataRow, position: usize) -> u64 {
    settings.row_offset(row).unwrap_or(position as u64)
}

/// Rows are only spilled after a tuple was extracted, so a spilled row always has one.
fn spilled_tuple(
    settings: &JoinTableSettings,
    row: &DataRow,
    spec: &JoinSpecification,
) -> Result<JoinTuple> {
    JoinTuple::extract(settings, row, spec.comparison_mode()).ok_or_else(|| {
        Error::Internal(format!(
            "spilled {} row '{}' has no join tuple",
            settings.side(),
            row.key()
        ))
    })
}
