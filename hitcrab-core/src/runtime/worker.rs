//! Worker execution model.
//!
//! One worker per thread, each owning a disjoint host shard: its own
//! [`WindowAggregator`] (window store and last watermark seen) and its own
//! emitter. Nothing is shared between workers except the sink behind the
//! emitter. Event-time progress comes from the driver, which broadcasts the
//! stream watermark to every inbox, so a shard with no traffic of its own
//! still closes its windows.
//!
//! # Event Loop
//!
//! ```text
//! loop {
//!     element = inbox.recv()
//!     match element {
//!         Record(event)     => aggregator.ingest(event)
//!         Watermark(wm)     => aggregator.advance_watermark(wm)  // may emit
//!         CheckpointBarrier => ack(snapshot_state())
//!         Drain             => aggregator.drain()        // emit everything open
//!         End               => break
//!     }
//! }
//! ```
//!
//! The inbox is FIFO, so the snapshot taken at a barrier reflects exactly
//! the records routed before it. The worker keeps processing right after
//! acking; there is no global pause.

use super::*;

/// Single-threaded shard processor.
pub struct Worker {
    worker_id: WorkerId,
    aggregator: WindowAggregator,
    emitter: Box<dyn Emitter + Send>,
    inbox: Receiver<StreamElement<HitEvent>>,
    checkpoint_events: Sender<WorkerCheckpointEvent>,
}

impl Worker {
    pub fn new(
        aggregator: WindowAggregator,
        emitter: Box<dyn Emitter + Send>,
        inbox: Receiver<StreamElement<HitEvent>>,
        checkpoint_events: Sender<WorkerCheckpointEvent>,
    ) -> Self {
        Self {
            worker_id: aggregator.partition(),
            aggregator,
            emitter,
            inbox,
            checkpoint_events,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Run until `End` arrives or the driver hangs up.
    pub fn run(&mut self) -> Result<()> {
        tracing::debug!("worker {} started", self.worker_id);
        loop {
            let element = match self.inbox.recv() {
                Ok(element) => element,
                Err(_) => {
                    tracing::debug!("worker {} inbox closed", self.worker_id);
                    break;
                }
            };
            match element {
                StreamElement::Record(event) => {
                    self.aggregator.ingest(&event);
                }
                StreamElement::Watermark(watermark) => {
                    self.aggregator
                        .advance_watermark(watermark, self.emitter.as_mut());
                }
                StreamElement::CheckpointBarrier(barrier) => {
                    self.handle_barrier(barrier.checkpoint_id)?;
                }
                StreamElement::Drain => {
                    let emitted = self.aggregator.drain(self.emitter.as_mut());
                    tracing::debug!(
                        "worker {} drained, {} windows emitted",
                        self.worker_id,
                        emitted
                    );
                }
                StreamElement::End => break,
            }
        }
        tracing::debug!(
            "worker {} stopped with {} open windows",
            self.worker_id,
            self.aggregator.store().len()
        );
        Ok(())
    }

    fn handle_barrier(&mut self, checkpoint_id: CheckpointId) -> Result<()> {
        let event = match self.aggregator.snapshot_state() {
            Ok(state) => WorkerCheckpointEvent::Ack(WorkerCheckpointAck {
                checkpoint_id,
                worker_id: self.worker_id,
                state,
            }),
            Err(err) => WorkerCheckpointEvent::Aborted(WorkerCheckpointAbort {
                checkpoint_id,
                worker_id: self.worker_id,
                reason: format!("{err:#}"),
            }),
        };
        self.checkpoint_events
            .send(event)
            .map_err(|_| anyhow!("checkpoint event channel closed"))
    }

    /// Start the worker on its own named thread.
    pub fn spawn(mut self, sender: Sender<StreamElement<HitEvent>>) -> Result<WorkerHandle> {
        let worker_id = self.worker_id;
        let join = std::thread::Builder::new()
            .name(format!("hitcrab-worker-{worker_id}"))
            .spawn(move || self.run())
            .with_context(|| format!("failed to spawn worker {worker_id}"))?;
        Ok(WorkerHandle {
            worker_id,
            sender: Some(sender),
            join: Some(join),
        })
    }
}

/// Driver-side handle of a running [`Worker`].
pub struct WorkerHandle {
    worker_id: WorkerId,
    sender: Option<Sender<StreamElement<HitEvent>>>,
    join: Option<JoinHandle<Result<()>>>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Enqueue an element, blocking while the inbox is full.
    pub fn send(&self, element: StreamElement<HitEvent>) -> Result<()> {
        let sender = self.sender.as_ref().ok_or_else(|| {
            EngineError::WorkerFailed(self.worker_id, "inbox already closed".to_string())
        })?;
        sender.send(element).map_err(|_| {
            EngineError::WorkerFailed(self.worker_id, "worker thread has exited".to_string())
                .into()
        })
    }

    /// True if the thread stopped on its own.
    pub fn has_exited(&self) -> bool {
        self.join.as_ref().is_none_or(|join| join.is_finished())
    }

    /// Close the inbox and wait for the thread to finish its queue.
    pub fn join(mut self) -> Result<()> {
        self.sender.take();
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        match join.join() {
            Ok(result) => result
                .map_err(|err| EngineError::WorkerFailed(self.worker_id, format!("{err:#}")).into()),
            Err(_) => Err(EngineError::WorkerFailed(self.worker_id, "panicked".to_string()).into()),
        }
    }
}
