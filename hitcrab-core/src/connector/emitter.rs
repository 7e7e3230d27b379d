use super::*;

/// [`Emitter`] writing each aggregate to a [`SinkWriter`], retrying
/// transient failures.
pub struct SinkEmitter {
    sink: Arc<dyn SinkWriter>,
    retry: RetryPolicy,
}

impl SinkEmitter {
    pub fn new(sink: Arc<dyn SinkWriter>, retry: RetryPolicy) -> Self {
        Self { sink, retry }
    }
}

impl Emitter for SinkEmitter {
    fn emit(&mut self, aggregate: &WindowAggregate) -> Result<()> {
        let row = aggregate.to_row();
        retry_with_backoff(&self.retry, "sink upsert", || self.sink.upsert(&row))
    }
}
