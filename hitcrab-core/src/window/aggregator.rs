use super::*;

// ── WindowAggregator ──────────────────────────────────────────────────────────

/// Outcome of ingesting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Counted; `count` is the window's running total.
    Accepted { window: TimeWindow, count: u64 },
    /// The window was already finalized; the event was dropped.
    Late { window: TimeWindow },
}

/// Checkpointed state of one aggregator shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorSnapshot {
    pub worker_id: WorkerId,
    pub windows: WindowStoreSnapshot,
    /// Last stream watermark the shard observed.
    pub watermark: EventTime,
    pub late_dropped: u64,
}

impl Default for AggregatorSnapshot {
    fn default() -> Self {
        Self {
            worker_id: 0,
            windows: WindowStoreSnapshot::default(),
            watermark: EVENT_TIME_MIN,
            late_dropped: 0,
        }
    }
}

/// Tumbling-window hit counter for one parallel partition.
///
/// # Processing model
///
/// The aggregator does not derive event-time progress from its own events.
/// The driver tracks the watermark per source partition and broadcasts the
/// stream watermark to every shard:
///
/// - `ingest`: assign window → late check → state update.
/// - `advance_watermark`: raise the watermark → fire due windows.
///
/// Fired windows are handed to the [`Emitter`] in ascending window order and
/// evicted only after a successful emit, so an emitter failure leaves the
/// window open (still counting events) to be retried on the next advance.
pub struct WindowAggregator {
    partition: WorkerId,
    assigner: TumblingWindowAssigner,
    trigger: EventTimeTrigger,
    store: WindowStateStore,
    watermark: EventTime,
    late_dropped: u64,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl WindowAggregator {
    pub fn new(partition: WorkerId, config: &EngineConfig) -> Result<Self, EngineError> {
        Ok(Self {
            partition,
            assigner: TumblingWindowAssigner::of(config.window_size)?,
            trigger: EventTimeTrigger,
            store: WindowStateStore::new(),
            watermark: EVENT_TIME_MIN,
            late_dropped: 0,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn partition(&self) -> WorkerId {
        self.partition
    }

    /// Count one event into its window.
    ///
    /// The event is late only if the watermark has passed its window and the
    /// window is gone from the store. A window kept open by a failed emit
    /// still takes events.
    pub fn ingest(&mut self, event: &HitEvent) -> IngestOutcome {
        let window = self.assigner.assign(event.event_time);
        if self.trigger.should_fire(&window, self.watermark)
            && self.store.get(&event.host, window.start).is_none()
        {
            self.late_dropped += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_late_dropped();
            }
            tracing::debug!(
                "drop late event: host={}, event_time={}, {}, watermark={}",
                event.host,
                event.event_time,
                window,
                self.watermark
            );
            return IngestOutcome::Late { window };
        }

        let count = self.store.update(&event.host, window, 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_ingested();
        }
        IngestOutcome::Accepted { window, count }
    }

    /// Raise the watermark (lower values are ignored) and emit every open
    /// window it has passed.
    ///
    /// Returns the number of windows emitted.
    pub fn advance_watermark(&mut self, watermark: Watermark, emitter: &mut dyn Emitter) -> usize {
        if watermark.timestamp > self.watermark {
            self.watermark = watermark.timestamp;
        }
        self.fire_due(self.watermark, emitter)
    }

    /// Emit and evict every open window the current watermark has passed.
    ///
    /// Returns the number of windows emitted.
    pub fn fire_pending(&mut self, emitter: &mut dyn Emitter) -> usize {
        self.fire_due(self.watermark, emitter)
    }

    /// Emit every open window as it stands (end of a bounded input).
    ///
    /// Neither the watermark nor the store changes: the windows stay open
    /// until the watermark really passes them, so a later run over grown
    /// input keeps counting into them and re-emits the larger total.
    pub fn drain(&mut self, emitter: &mut dyn Emitter) -> usize {
        let mut flushed = 0;
        for aggregate in self.store.due(EVENT_TIME_MAX) {
            if let Err(err) = emitter.emit(&aggregate) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_emit_failure();
                }
                tracing::warn!(
                    "drain emit failed for host={} {}: {:#}",
                    aggregate.host,
                    aggregate.window,
                    err
                );
                break;
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_emitted();
            }
            flushed += 1;
        }
        flushed
    }

    fn fire_due(&mut self, watermark: EventTime, emitter: &mut dyn Emitter) -> usize {
        let mut fired = 0;
        for aggregate in self.store.due(watermark) {
            if !self
                .trigger
                .on_event_time(watermark, &aggregate.window)
                .is_fire()
            {
                continue;
            }
            if let Err(err) = emitter.emit(&aggregate) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_emit_failure();
                }
                tracing::warn!(
                    "emit failed for host={} {}, keeping window open: {:#}",
                    aggregate.host,
                    aggregate.window,
                    err
                );
                break;
            }
            self.store.evict(&aggregate.host, &aggregate.window);
            if let Some(metrics) = &self.metrics {
                metrics.record_emitted();
            }
            tracing::debug!(
                "emitted host={} {} count={}",
                aggregate.host,
                aggregate.window,
                aggregate.count
            );
            fired += 1;
        }
        fired
    }

    /// Last watermark received, `None` before the first one.
    pub fn watermark(&self) -> Option<Watermark> {
        (self.watermark != EVENT_TIME_MIN).then(|| Watermark::new(self.watermark))
    }

    pub fn store(&self) -> &WindowStateStore {
        &self.store
    }

    pub fn late_dropped(&self) -> u64 {
        self.late_dropped
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            worker_id: self.partition,
            windows: self.store.snapshot(),
            watermark: self.watermark,
            late_dropped: self.late_dropped,
        }
    }

    pub fn restore(&mut self, snapshot: AggregatorSnapshot) -> Result<()> {
        if snapshot.worker_id != self.partition {
            anyhow::bail!(
                "snapshot belongs to worker {}, not {}",
                snapshot.worker_id,
                self.partition
            );
        }
        self.store.restore(snapshot.windows);
        self.watermark = snapshot.watermark;
        self.late_dropped = snapshot.late_dropped;
        Ok(())
    }

    /// Snapshot serialized for checkpoint storage.
    pub fn snapshot_state(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.snapshot())?)
    }

    /// Restore from bytes produced by [`snapshot_state`](Self::snapshot_state).
    /// Empty input resets the aggregator.
    pub fn restore_state(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return self.restore(AggregatorSnapshot {
                worker_id: self.partition,
                ..Default::default()
            });
        }
        let snapshot: AggregatorSnapshot = bincode::deserialize(data)?;
        self.restore(snapshot)
    }
}
