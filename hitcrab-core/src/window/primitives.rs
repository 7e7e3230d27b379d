use super::*;

/// A half-open event-time window `[start, end)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeWindow {
    pub start: EventTime,
    pub end: EventTime,
}

impl TimeWindow {
    pub fn new(start: EventTime, end: EventTime) -> Self {
        Self { start, end }
    }

    /// The maximum timestamp that belongs to this window.
    pub fn max_timestamp(&self) -> EventTime {
        self.end - 1
    }

    /// Return true if `timestamp` falls inside this window.
    pub fn contains(&self, timestamp: EventTime) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TimeWindow([{}, {}))", self.start, self.end)
    }
}

/// Partial (while open) or final (once emitted) hit count of one host in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub host: String,
    pub window: TimeWindow,
    pub count: u64,
}

impl WindowAggregate {
    pub fn new(host: impl Into<String>, window: TimeWindow, count: u64) -> Self {
        Self {
            host: host.into(),
            window,
            count,
        }
    }

    pub fn to_row(&self) -> AggregateRow {
        AggregateRow {
            window_start: self.window.start,
            host: self.host.clone(),
            count: self.count,
        }
    }
}

/// Output row. `(window_start, host)` is the sink primary key, so writing the
/// same row twice overwrites instead of duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRow {
    pub window_start: EventTime,
    pub host: String,
    pub count: u64,
}

impl AggregateRow {
    pub fn key(&self) -> (EventTime, &str) {
        (self.window_start, self.host.as_str())
    }
}
