//! Append-only spill files holding the rows of one partition of one join input.
//!
//! Rows are buffered and written as Arrow IPC stream batches to a temporary file that is
//! created on the first row and deleted when the bucket is dropped. A bucket is written, closed
//! once, and then read back any number of times in insertion order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use spilljoin_result::{Error, Result};
use spilljoin_table::{DataRow, RowCodec};
use tempfile::NamedTempFile;

const SPILL_FILE_PREFIX: &str = "spilljoin-";

/// Where and how spill files are written.
#[derive(Debug, Clone)]
pub(crate) struct SpillConfig {
    spill_dir: Option<PathBuf>,
    batch_rows: usize,
}

impl SpillConfig {
    pub(crate) fn new(spill_dir: Option<&Path>, batch_rows: usize) -> Self {
        Self {
            spill_dir: spill_dir.map(Path::to_path_buf),
            batch_rows: batch_rows.max(1),
        }
    }

    /// A new, empty bucket for rows encoded with `codec`.
    pub(crate) fn bucket(&self, codec: &RowCodec) -> DiskBucket {
        DiskBucket {
            codec: codec.clone(),
            config: self.clone(),
            buffer: Vec::new(),
            state: BucketState::Empty,
            num_rows: 0,
        }
    }

    fn create_file(&self) -> Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPILL_FILE_PREFIX).suffix(".arrows");
        let file = match &self.spill_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }
}

enum BucketState {
    /// No row added yet; no file exists.
    Empty,
    Writing {
        writer: StreamWriter<BufWriter<File>>,
        file: NamedTempFile,
    },
    /// Complete. `None` if the bucket never received a row.
    Closed { file: Option<NamedTempFile> },
}

/// Spill file of one partition of one input.
pub(crate) struct DiskBucket {
    codec: RowCodec,
    config: SpillConfig,
    buffer: Vec<DataRow>,
    state: BucketState,
    num_rows: u64,
}

impl DiskBucket {
    pub(crate) fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(self.state, BucketState::Closed { .. })
    }

    /// Path of the spill file, once one exists.
    #[cfg(test)]
    pub(crate) fn path(&self) -> Option<&Path> {
        match &self.state {
            BucketState::Empty | BucketState::Closed { file: None } => None,
            BucketState::Writing { file, .. } | BucketState::Closed { file: Some(file) } => {
                Some(file.path())
            }
        }
    }

    pub(crate) fn add(&mut self, row: DataRow) -> Result<()> {
        match self.state {
            BucketState::Closed { .. } => {
                return Err(Error::Internal(
                    "cannot add rows to a closed disk bucket".to_string(),
                ));
            }
            BucketState::Empty => self.open()?,
            BucketState::Writing { .. } => {}
        }

        self.buffer.push(row);
        self.num_rows += 1;
        if self.buffer.len() >= self.config.batch_rows {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Write out buffered rows and finish the file. Closing a closed bucket does nothing.
    pub(crate) fn close(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, BucketState::Closed { file: None }) {
            BucketState::Empty => Ok(()),
            BucketState::Writing { mut writer, file } => {
                if !self.buffer.is_empty() {
                    let batch = self.codec.encode(&self.buffer)?;
                    self.buffer.clear();
                    writer.write(&batch)?;
                }
                writer.finish()?;
                writer.into_inner()?.flush()?;
                tracing::trace!(
                    rows = self.num_rows,
                    path = %file.path().display(),
                    "closed spill file"
                );
                self.state = BucketState::Closed { file: Some(file) };
                Ok(())
            }
            closed @ BucketState::Closed { .. } => {
                self.state = closed;
                Ok(())
            }
        }
    }

    /// Read the rows back in insertion order. The bucket must be closed.
    pub(crate) fn rows(&self) -> Result<BucketRows> {
        match &self.state {
            BucketState::Closed { file: None } => Ok(BucketRows {
                reader: None,
                codec: self.codec.clone(),
                pending: Vec::new().into_iter(),
            }),
            BucketState::Closed { file: Some(file) } => {
                let reader = StreamReader::try_new(BufReader::new(file.reopen()?), None)?;
                Ok(BucketRows {
                    reader: Some(reader),
                    codec: self.codec.clone(),
                    pending: Vec::new().into_iter(),
                })
            }
            BucketState::Empty | BucketState::Writing { .. } => Err(Error::Internal(
                "disk bucket must be closed before it is read".to_string(),
            )),
        }
    }

    fn open(&mut self) -> Result<()> {
        let file = self.config.create_file()?;
        let handle = file.as_file().try_clone()?;
        let writer = StreamWriter::try_new(BufWriter::new(handle), self.codec.batch_schema())?;
        tracing::trace!(path = %file.path().display(), "opened spill file");
        self.state = BucketState::Writing { writer, file };
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let BucketState::Writing { writer, .. } = &mut self.state else {
            return Err(Error::Internal(
                "disk bucket has buffered rows but no open file".to_string(),
            ));
        };
        let batch = self.codec.encode(&self.buffer)?;
        self.buffer.clear();
        writer.write(&batch)?;
        Ok(())
    }
}

impl Drop for DiskBucket {
    fn drop(&mut self) {
        if let BucketState::Writing { writer, .. } = &mut self.state
            && let Err(err) = writer.finish()
        {
            tracing::debug!(error = %err, "failed to finish spill file of discarded bucket");
        }
    }
}

/// Rows of a closed bucket, decoded one batch at a time.
pub(crate) struct BucketRows {
    reader: Option<StreamReader<BufReader<File>>>,
    codec: RowCodec,
    pending: std::vec::IntoIter<DataRow>,
}

impl Iterator for BucketRows {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.next() {
                return Some(Ok(row));
            }
            let batch = match self.reader.as_mut()?.next() {
                Some(Ok(batch)) => batch,
                Some(Err(err)) => {
                    self.reader = None;
                    return Some(Err(err.into()));
                }
                None => {
                    self.reader = None;
                    return None;
                }
            };
            match self.codec.decode(&batch) {
                Ok(rows) => self.pending = rows.into_iter(),
                Err(err) => {
                    self.reader = None;
                    return Some(Err(err));
                }
            }
        }
    }
}
