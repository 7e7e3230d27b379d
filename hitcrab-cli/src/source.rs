//! JSON-lines files as a partitioned, replayable source.
//!
//! Each input file is one partition (partition id = position on the command
//! line) and each line one record (offset = zero-based line number). Files
//! are read up front; the source is bounded and exhausted once every line
//! has been handed out.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hitcrab_core::EngineError;
use hitcrab_core::connector::SourceConnector;
use hitcrab_core::types::{Offset, PartitionId, SourceRecord};

struct FilePartition {
    path: PathBuf,
    lines: Vec<String>,
    position: Offset,
}

pub struct FileSource {
    partitions: Vec<FilePartition>,
    cursor: usize,
    committed: BTreeMap<PartitionId, Offset>,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let partitions = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                let file =
                    File::open(path).with_context(|| format!("open input {}", path.display()))?;
                let lines = BufReader::new(file)
                    .lines()
                    .collect::<std::io::Result<Vec<_>>>()
                    .with_context(|| format!("read input {}", path.display()))?;
                tracing::info!("input {} has {} records", path.display(), lines.len());
                Ok(FilePartition {
                    path: path.to_path_buf(),
                    lines,
                    position: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            partitions,
            cursor: 0,
            committed: BTreeMap::new(),
        })
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn committed(&self) -> &BTreeMap<PartitionId, Offset> {
        &self.committed
    }
}

impl SourceConnector for FileSource {
    fn poll(&mut self, _timeout: Duration) -> Result<Option<SourceRecord>> {
        let n = self.partitions.len();
        for step in 0..n {
            let idx = (self.cursor + step) % n;
            let partition = &mut self.partitions[idx];
            let Some(line) = partition.lines.get(partition.position as usize) else {
                continue;
            };
            let record = SourceRecord::new(
                idx as PartitionId,
                partition.position,
                line.as_bytes().to_vec(),
            );
            partition.position += 1;
            self.cursor = (idx + 1) % n;
            return Ok(Some(record));
        }
        Ok(None)
    }

    fn is_exhausted(&self) -> bool {
        self.partitions
            .iter()
            .all(|p| p.position as usize >= p.lines.len())
    }

    fn seek(&mut self, partition_id: PartitionId, offset: Offset) -> Result<()> {
        let partition = self
            .partitions
            .get_mut(partition_id as usize)
            .ok_or_else(|| EngineError::Seek {
                partition_id,
                offset,
                reason: "no input file for this partition".to_string(),
            })?;
        if offset as usize > partition.lines.len() {
            return Err(EngineError::Seek {
                partition_id,
                offset,
                reason: format!(
                    "{} has only {} lines",
                    partition.path.display(),
                    partition.lines.len()
                ),
            }
            .into());
        }
        partition.position = offset;
        tracing::info!(
            "input {} resumes at line {}",
            partition.path.display(),
            offset
        );
        Ok(())
    }

    fn commit(&mut self, partition_id: PartitionId, offset: Offset) -> Result<()> {
        self.committed.insert(partition_id, offset);
        tracing::debug!("partition {} committed up to line {}", partition_id, offset);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/source_tests.rs"]
mod tests;
