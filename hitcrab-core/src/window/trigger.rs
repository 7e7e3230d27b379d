use super::*;

// ── Trigger ───────────────────────────────────────────────────────────────────

/// The result returned by a trigger to control window evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// Keep accumulating; do not fire the window yet.
    Continue,
    /// Emit the aggregate, then discard the window state.
    FireAndPurge,
}

impl TriggerResult {
    pub fn is_fire(self) -> bool {
        matches!(self, TriggerResult::FireAndPurge)
    }
}

/// Fires a window once the watermark reaches its end.
///
/// `watermark >= window.end` is the only firing condition. Because firing
/// also purges, and the watermark never regresses, a window fires at most
/// once per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTimeTrigger;

impl EventTimeTrigger {
    pub fn should_fire(&self, window: &TimeWindow, watermark: EventTime) -> bool {
        watermark >= window.end
    }

    pub fn on_event_time(&self, watermark: EventTime, window: &TimeWindow) -> TriggerResult {
        if self.should_fire(window, watermark) {
            TriggerResult::FireAndPurge
        } else {
            TriggerResult::Continue
        }
    }
}

// ── Emitter ───────────────────────────────────────────────────────────────────

/// Receives finalized window aggregates.
///
/// Emission may be repeated for the same window after a crash between emit
/// and checkpoint completion, so downstream writes must be idempotent.
pub trait Emitter {
    fn emit(&mut self, aggregate: &WindowAggregate) -> Result<()>;
}

impl<E: Emitter + ?Sized> Emitter for &mut E {
    fn emit(&mut self, aggregate: &WindowAggregate) -> Result<()> {
        (**self).emit(aggregate)
    }
}

impl<E: Emitter + ?Sized> Emitter for Box<E> {
    fn emit(&mut self, aggregate: &WindowAggregate) -> Result<()> {
        self.as_mut().emit(aggregate)
    }
}

/// Buffers everything it is given. Useful for tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectingEmitter {
    pub emitted: Vec<WindowAggregate>,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&mut self) -> Vec<WindowAggregate> {
        std::mem::take(&mut self.emitted)
    }
}

impl Emitter for CollectingEmitter {
    fn emit(&mut self, aggregate: &WindowAggregate) -> Result<()> {
        self.emitted.push(aggregate.clone());
        Ok(())
    }
}
