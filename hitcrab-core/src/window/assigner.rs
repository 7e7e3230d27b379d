use super::*;

/// Fixed-size, non-overlapping event-time windows aligned to multiples of `size`.
///
/// Assignment is a pure function of the timestamp, which keeps replay after
/// recovery landing every event in the same window it was counted in before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingWindowAssigner {
    size_ms: i64,
}

impl TumblingWindowAssigner {
    /// Create tumbling windows of the given `size`.
    pub fn of(size: Duration) -> Result<Self, EngineError> {
        let size_ms = size.as_millis() as i64;
        if size_ms <= 0 {
            return Err(EngineError::Config(format!(
                "window size must be at least 1ms, got {size:?}"
            )));
        }
        Ok(Self { size_ms })
    }

    pub fn size_ms(&self) -> i64 {
        self.size_ms
    }

    /// Return the window containing `timestamp`.
    pub fn assign(&self, timestamp: EventTime) -> TimeWindow {
        assign_window(timestamp, self.size_ms)
    }
}

/// `start = floor(timestamp / size) * size`, `end = start + size`.
///
/// Uses Euclidean remainder so timestamps before the epoch floor downwards.
pub fn assign_window(timestamp: EventTime, size_ms: i64) -> TimeWindow {
    let start = timestamp - timestamp.rem_euclid(size_ms);
    TimeWindow::new(start, start.saturating_add(size_ms))
}
