//! Pipeline driver.
//!
//! The driver is the only thread touching the source and the checkpoint
//! coordinator. It decodes records, routes events to workers, tracks the
//! next offset to read per source partition, injects checkpoint barriers on
//! a processing-time interval and commits source offsets once a checkpoint
//! covering them is complete.
//!
//! The driver also owns event-time progress. Watermarks are tracked per
//! source partition; whenever their minimum rises it is broadcast to every
//! worker behind the record that raised it.

use super::*;

/// How long a single source poll may block.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Windowed hit-count pipeline: one driver, `parallelism` workers.
pub struct AggregationPipeline<S: CheckpointStorage> {
    config: EngineConfig,
    coordinator: CheckpointCoordinator<S>,
    partitioner: KeyPartitioner,
    workers: Vec<WorkerHandle>,
    checkpoint_events: Receiver<WorkerCheckpointEvent>,
    /// Next offset to read, per source partition.
    offsets: BTreeMap<PartitionId, Offset>,
    watermarks: WatermarkTracker,
    /// Stream watermark last sent to the workers.
    last_broadcast: EventTime,
    last_checkpoint: Instant,
    recovered_from: Option<CheckpointId>,
    accepting: bool,
    metrics: Arc<PipelineMetrics>,
}

impl<S: CheckpointStorage> AggregationPipeline<S> {
    /// Recover from the latest complete checkpoint, reposition `source` and
    /// start the workers.
    ///
    /// Fails when the configuration is invalid, when a checkpoint exists but
    /// cannot be used, or when the source cannot seek to its offsets.
    pub fn start(
        config: EngineConfig,
        storage: Arc<S>,
        sink: Arc<dyn SinkWriter>,
        source: &mut dyn SourceConnector,
    ) -> Result<Self> {
        config.validate()?;
        let coordinator = CheckpointCoordinator::for_config(storage, &config);
        let metrics = Arc::new(PipelineMetrics::new());

        let mut recovered = coordinator.recover()?;
        let mut offsets = BTreeMap::new();
        let mut watermarks = WatermarkTracker::new(config.allowed_lateness);
        if let Some(checkpoint) = &recovered {
            checkpoint.metadata.check_compatible(&config)?;
            for (&partition_id, &offset) in &checkpoint.metadata.input_offsets {
                source
                    .seek(partition_id, offset)
                    .map_err(|err| seek_error(err, partition_id, offset))?;
            }
            offsets = checkpoint.metadata.input_offsets.clone();
            watermarks.restore(checkpoint.metadata.watermarks.clone());
        }
        let last_broadcast = watermarks
            .combined()
            .map_or(EVENT_TIME_MIN, |watermark| watermark.timestamp);
        let recovered_from = recovered.as_ref().map(|c| c.checkpoint_id());

        let (event_tx, checkpoint_events) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(config.parallelism);
        for worker_id in 0..config.parallelism {
            let mut aggregator =
                WindowAggregator::new(worker_id, &config)?.with_metrics(metrics.clone());
            if let Some(snapshot) = recovered
                .as_mut()
                .and_then(|checkpoint| checkpoint.workers.remove(&worker_id))
            {
                aggregator.restore(snapshot).map_err(|err| {
                    EngineError::Recovery(format!("worker {worker_id} state: {err:#}"))
                })?;
            }
            let emitter = SinkEmitter::new(sink.clone(), config.sink_retry.clone());
            let (tx, rx) = crossbeam_channel::bounded(config.channel_capacity);
            let worker = Worker::new(aggregator, Box::new(emitter), rx, event_tx.clone());
            workers.push(worker.spawn(tx)?);
        }

        match recovered_from {
            Some(checkpoint_id) => tracing::info!(
                "pipeline started from checkpoint {} with {} workers, offsets {:?}",
                checkpoint_id,
                config.parallelism,
                offsets
            ),
            None => tracing::info!(
                "pipeline started fresh with {} workers",
                config.parallelism
            ),
        }

        Ok(Self {
            config,
            coordinator,
            partitioner: KeyPartitioner::new(),
            workers,
            checkpoint_events,
            offsets,
            watermarks,
            last_broadcast,
            last_checkpoint: Instant::now(),
            recovered_from,
            accepting: true,
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &CheckpointCoordinator<S> {
        &self.coordinator
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Checkpoint the pipeline resumed from, if any.
    pub fn recovered_from(&self) -> Option<CheckpointId> {
        self.recovered_from
    }

    /// Next offset to read, per source partition.
    pub fn offsets(&self) -> &BTreeMap<PartitionId, Offset> {
        &self.offsets
    }

    /// Decode one record, route it to the worker owning its host and
    /// broadcast the stream watermark if the record raised it.
    ///
    /// A record that does not decode is skipped and counted; its offset
    /// still advances so it is not replayed after recovery.
    pub fn ingest(&mut self, record: SourceRecord, decoder: &dyn Decoder) -> Result<()> {
        if !self.accepting {
            return Err(anyhow!("pipeline is shutting down"));
        }
        self.offsets.insert(record.partition_id, record.offset + 1);

        let event = match decoder.decode(&record) {
            Ok(event) => event,
            Err(err) => {
                self.metrics.record_decode_error();
                tracing::warn!(
                    "skip undecodable record at partition {} offset {}: {:#}",
                    record.partition_id,
                    record.offset,
                    err
                );
                return Ok(());
            }
        };

        let worker_id = self
            .partitioner
            .worker_for_host(&event.host, self.workers.len());
        let event_time = event.event_time;
        self.workers[worker_id].send(StreamElement::Record(event))?;

        self.watermarks.advance(record.partition_id, event_time);
        self.broadcast_watermark()
    }

    /// Stream watermark: the minimum over the source partitions seen so far.
    pub fn watermark(&self) -> Option<Watermark> {
        self.watermarks.combined()
    }

    fn broadcast_watermark(&mut self) -> Result<()> {
        let Some(watermark) = self.watermarks.combined() else {
            return Ok(());
        };
        if watermark.timestamp <= self.last_broadcast {
            return Ok(());
        }
        self.last_broadcast = watermark.timestamp;
        for worker in &self.workers {
            worker.send(StreamElement::Watermark(watermark))?;
        }
        Ok(())
    }

    /// Poll `source` until it is exhausted or `shutdown` is raised.
    ///
    /// Checkpoints are triggered on the configured interval and completed
    /// ones are committed back to the source. Returns on the first fatal
    /// error; aborted checkpoints are logged and skipped.
    pub fn run(
        &mut self,
        source: &mut dyn SourceConnector,
        decoder: &dyn Decoder,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        let source_retry = self.config.source_retry.clone();
        while !shutdown.load(Ordering::SeqCst) {
            self.check_workers()?;
            let polled = retry_with_backoff(&source_retry, "source poll", || {
                source.poll(POLL_TIMEOUT)
            })?;
            match polled {
                Some(record) => self.ingest(record, decoder)?,
                None if source.is_exhausted() => {
                    tracing::info!("source exhausted at offsets {:?}", self.offsets);
                    break;
                }
                None => {}
            }
            self.maybe_checkpoint(source)?;
        }
        Ok(())
    }

    /// Trigger a checkpoint if the interval elapsed, abort the pending one if
    /// it timed out and handle worker acks that have arrived.
    pub fn maybe_checkpoint(
        &mut self,
        source: &mut dyn SourceConnector,
    ) -> Result<Option<CheckpointId>> {
        self.process_checkpoint_events(source)?;

        if let Some((checkpoint_id, _)) = self.coordinator.pending_checkpoint()? {
            if self.last_checkpoint.elapsed() >= self.config.checkpoint_timeout
                && self
                    .coordinator
                    .abort_checkpoint(checkpoint_id, "timed out waiting for workers")?
            {
                self.metrics.record_checkpoint_aborted();
            }
            return Ok(None);
        }

        if self.last_checkpoint.elapsed() < self.config.checkpoint_interval {
            return Ok(None);
        }
        self.trigger_checkpoint().map(Some)
    }

    /// Inject a barrier for a new checkpoint into every worker inbox.
    pub fn trigger_checkpoint(&mut self) -> Result<CheckpointId> {
        let worker_ids = self.workers.iter().map(WorkerHandle::worker_id).collect();
        let barrier = self
            .coordinator
            .trigger_checkpoint_with_watermarks(
                self.offsets.clone(),
                self.watermarks.snapshot(),
                worker_ids,
            )?;
        for worker in &self.workers {
            worker.send(StreamElement::CheckpointBarrier(barrier))?;
        }
        self.last_checkpoint = Instant::now();
        Ok(barrier.checkpoint_id)
    }

    /// Take a checkpoint and wait up to `checkpoint_timeout` for it.
    ///
    /// Returns the metadata if the checkpoint completed, `None` if it was
    /// aborted or timed out.
    pub fn checkpoint(
        &mut self,
        source: &mut dyn SourceConnector,
    ) -> Result<Option<CheckpointMetadata>> {
        let deadline = Instant::now() + self.config.checkpoint_timeout;
        // Let an in-flight checkpoint finish first.
        if let Some((pending_id, _)) = self.coordinator.pending_checkpoint()? {
            self.await_checkpoint(pending_id, deadline, source)?;
        }
        let checkpoint_id = self.trigger_checkpoint()?;
        self.await_checkpoint(checkpoint_id, deadline, source)
    }

    /// Emit every open window as it stands and stop admitting records.
    ///
    /// The watermark does not move: drained windows stay open, so records
    /// appended to the input later still count into them after a restart.
    pub fn drain(&mut self) -> Result<()> {
        tracing::info!("draining all open windows");
        self.accepting = false;
        for worker in &self.workers {
            worker.send(StreamElement::Drain)?;
        }
        Ok(())
    }

    /// Stop admitting records, take a final checkpoint, stop the workers
    /// and wait for them.
    pub fn shutdown(mut self, source: &mut dyn SourceConnector) -> Result<MetricsSnapshot> {
        self.accepting = false;
        let final_checkpoint = self.checkpoint(source);
        for worker in &self.workers {
            // A worker that already exited reports through `join` below.
            let _ = worker.send(StreamElement::End);
        }
        let joined = self.join_workers();

        match final_checkpoint? {
            Some(metadata) => tracing::info!(
                "final checkpoint {} complete, offsets {:?}",
                metadata.checkpoint_id,
                metadata.input_offsets
            ),
            None => tracing::warn!("final checkpoint did not complete"),
        }
        joined?;

        let snapshot = self.metrics.snapshot();
        tracing::info!("pipeline stopped: {}", snapshot);
        Ok(snapshot)
    }

    /// Stop without a final checkpoint. The next start resumes from the last
    /// complete one, exactly as after a crash.
    pub fn kill(mut self) -> Result<MetricsSnapshot> {
        self.accepting = false;
        self.join_workers()?;
        Ok(self.metrics.snapshot())
    }

    fn join_workers(&mut self) -> Result<()> {
        let mut first_error = None;
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.join() {
                tracing::error!("{:#}", err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn check_workers(&self) -> Result<()> {
        match self.workers.iter().find(|worker| worker.has_exited()) {
            Some(worker) => Err(EngineError::WorkerFailed(
                worker.worker_id(),
                "worker thread stopped unexpectedly".to_string(),
            )
            .into()),
            None => Ok(()),
        }
    }

    fn await_checkpoint(
        &mut self,
        checkpoint_id: CheckpointId,
        deadline: Instant,
        source: &mut dyn SourceConnector,
    ) -> Result<Option<CheckpointMetadata>> {
        loop {
            if self.coordinator.aborted_checkpoint_ids()?.contains(&checkpoint_id) {
                return Ok(None);
            }
            if !self.coordinator.has_pending()? {
                return Ok(self
                    .coordinator
                    .latest_completed()?
                    .filter(|metadata| metadata.checkpoint_id == checkpoint_id));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.checkpoint_events.recv_timeout(remaining) {
                Ok(event) => {
                    self.handle_checkpoint_event(event, source)?;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self
                        .coordinator
                        .abort_checkpoint(checkpoint_id, "timed out waiting for workers")?
                    {
                        self.metrics.record_checkpoint_aborted();
                    }
                    return Ok(None);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("all workers hung up during checkpoint {checkpoint_id}"));
                }
            }
        }
    }

    fn process_checkpoint_events(&mut self, source: &mut dyn SourceConnector) -> Result<()> {
        loop {
            match self.checkpoint_events.try_recv() {
                Ok(event) => {
                    self.handle_checkpoint_event(event, source)?;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn handle_checkpoint_event(
        &mut self,
        event: WorkerCheckpointEvent,
        source: &mut dyn SourceConnector,
    ) -> Result<Option<CheckpointMetadata>> {
        match event {
            WorkerCheckpointEvent::Ack(ack) => match self.coordinator.acknowledge_checkpoint(ack) {
                Ok(Some(metadata)) => {
                    self.metrics.record_checkpoint_completed();
                    self.commit_offsets(&metadata, source);
                    Ok(Some(metadata))
                }
                Ok(None) => Ok(None),
                // Persist failures abort the checkpoint; stray or duplicate
                // acks cannot affect completed checkpoints. Neither is fatal.
                Err(err) => {
                    if matches!(
                        err.downcast_ref::<EngineError>(),
                        Some(EngineError::CheckpointAborted { .. })
                    ) {
                        self.metrics.record_checkpoint_aborted();
                    }
                    tracing::warn!("{:#}", err);
                    Ok(None)
                }
            },
            WorkerCheckpointEvent::Aborted(abort) => {
                let reason = format!("worker {} failed to snapshot: {}", abort.worker_id, abort.reason);
                if self.coordinator.abort_checkpoint(abort.checkpoint_id, &reason)? {
                    self.metrics.record_checkpoint_aborted();
                }
                Ok(None)
            }
        }
    }

    fn commit_offsets(&self, metadata: &CheckpointMetadata, source: &mut dyn SourceConnector) {
        for (&partition_id, &offset) in &metadata.input_offsets {
            if let Err(err) = source.commit(partition_id, offset) {
                tracing::warn!(
                    "commit of partition {} offset {} failed: {:#}",
                    partition_id,
                    offset,
                    err
                );
            }
        }
    }
}

fn seek_error(err: anyhow::Error, partition_id: PartitionId, offset: Offset) -> anyhow::Error {
    if matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Seek { .. })) {
        return err;
    }
    EngineError::Seek {
        partition_id,
        offset,
        reason: format!("{err:#}"),
    }
    .into()
}
