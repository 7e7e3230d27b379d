use super::*;

/// Bounded in-memory source. Partitions are polled round-robin.
#[derive(Debug, Default)]
pub struct MemorySource {
    partitions: BTreeMap<PartitionId, Vec<Vec<u8>>>,
    positions: BTreeMap<PartitionId, Offset>,
    committed: BTreeMap<PartitionId, Offset>,
    /// Partition to try first on the next poll.
    cursor: usize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source with one partition per entry, ids assigned from zero.
    pub fn from_partitions<P>(partitions: impl IntoIterator<Item = Vec<P>>) -> Self
    where
        P: Into<Vec<u8>>,
    {
        let mut source = Self::new();
        for (partition_id, payloads) in partitions.into_iter().enumerate() {
            for payload in payloads {
                source.push(partition_id as PartitionId, payload);
            }
        }
        source
    }

    /// Append a record to `partition_id`, creating the partition if needed.
    pub fn push(&mut self, partition_id: PartitionId, payload: impl Into<Vec<u8>>) -> Offset {
        let records = self.partitions.entry(partition_id).or_default();
        records.push(payload.into());
        self.positions.entry(partition_id).or_insert(0);
        records.len() as Offset - 1
    }

    pub fn position(&self, partition_id: PartitionId) -> Option<Offset> {
        self.positions.get(&partition_id).copied()
    }

    pub fn committed(&self) -> &BTreeMap<PartitionId, Offset> {
        &self.committed
    }
}

impl SourceConnector for MemorySource {
    fn poll(&mut self, _timeout: Duration) -> Result<Option<SourceRecord>> {
        let ids: Vec<PartitionId> = self.partitions.keys().copied().collect();
        for step in 0..ids.len() {
            let partition_id = ids[(self.cursor + step) % ids.len()];
            let offset = self.positions.get(&partition_id).copied().unwrap_or(0);
            let Some(payload) = self
                .partitions
                .get(&partition_id)
                .and_then(|records| records.get(offset as usize))
            else {
                continue;
            };
            let record = SourceRecord::new(partition_id, offset, payload.clone());
            self.positions.insert(partition_id, offset + 1);
            self.cursor = (self.cursor + step + 1) % ids.len();
            return Ok(Some(record));
        }
        Ok(None)
    }

    fn is_exhausted(&self) -> bool {
        self.partitions.iter().all(|(partition_id, records)| {
            self.positions.get(partition_id).copied().unwrap_or(0) >= records.len() as Offset
        })
    }

    fn seek(&mut self, partition_id: PartitionId, offset: Offset) -> Result<()> {
        let len = match self.partitions.get(&partition_id) {
            Some(records) => records.len() as Offset,
            None => {
                return Err(EngineError::Seek {
                    partition_id,
                    offset,
                    reason: "unknown partition".to_string(),
                }
                .into());
            }
        };
        if offset > len {
            return Err(EngineError::Seek {
                partition_id,
                offset,
                reason: format!("partition holds only {len} records"),
            }
            .into());
        }
        self.positions.insert(partition_id, offset);
        Ok(())
    }

    fn commit(&mut self, partition_id: PartitionId, offset: Offset) -> Result<()> {
        self.committed.insert(partition_id, offset);
        Ok(())
    }
}

/// In-memory upsert table keyed by `(window_start, host)`.
#[derive(Debug, Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<(EventTime, String), u64>>,
    upserts: AtomicU64,
    /// Number of upcoming upserts to reject.
    failures: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` upserts with an error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Stored rows, ascending by `(window_start, host)`.
    pub fn rows(&self) -> Vec<AggregateRow> {
        self.rows
            .lock()
            .map(|rows| {
                rows.iter()
                    .map(|((window_start, host), count)| AggregateRow {
                        window_start: *window_start,
                        host: host.clone(),
                        count: *count,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, window_start: EventTime, host: &str) -> Option<u64> {
        self.rows
            .lock()
            .ok()?
            .get(&(window_start, host.to_string()))
            .copied()
    }

    /// Successful upserts, including overwrites of existing rows.
    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }
}

impl SinkWriter for MemorySink {
    fn upsert(&self, row: &AggregateRow) -> Result<()> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!(
                "sink unavailable for ({}, {})",
                row.window_start,
                row.host
            ));
        }
        self.rows
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?
            .insert((row.window_start, row.host.clone()), row.count);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
