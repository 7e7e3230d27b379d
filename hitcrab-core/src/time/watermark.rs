use super::*;

/// Minimum possible event time. Used as the initial "no watermark" sentinel.
pub const EVENT_TIME_MIN: EventTime = i64::MIN;

/// Maximum possible event time. A watermark at this value finalizes every window.
pub const EVENT_TIME_MAX: EventTime = i64::MAX;

/// Watermark state of one source partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionWatermark {
    pub max_seen: EventTime,
    pub watermark: EventTime,
}

impl Default for PartitionWatermark {
    fn default() -> Self {
        Self {
            max_seen: EVENT_TIME_MIN,
            watermark: EVENT_TIME_MIN,
        }
    }
}

/// Serializable copy of a [`WatermarkTracker`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkSnapshot {
    pub partitions: BTreeMap<PartitionId, PartitionWatermark>,
}

/// Bounded out-of-orderness watermark, tracked per source partition.
///
/// The watermark of a partition is `max_seen_timestamp - allowed_lateness`,
/// so a window is only closed once events up to `allowed_lateness` past its
/// end have been observed. Watermarks never regress: an out-of-order event
/// updates nothing.
///
/// The stream watermark is the minimum over every partition that has
/// produced an event ([`combined`](Self::combined)); the driver broadcasts
/// it to all workers, so a worker whose hosts go quiet still closes windows.
#[derive(Debug, Clone)]
pub struct WatermarkTracker {
    allowed_lateness_ms: i64,
    partitions: BTreeMap<PartitionId, PartitionWatermark>,
}

impl WatermarkTracker {
    /// Create a tracker with the given allowed lateness.
    pub fn new(allowed_lateness: Duration) -> Self {
        Self {
            allowed_lateness_ms: allowed_lateness.as_millis() as i64,
            partitions: BTreeMap::new(),
        }
    }

    pub fn allowed_lateness_ms(&self) -> i64 {
        self.allowed_lateness_ms
    }

    /// Observe `event_time` on `partition` and return the partition watermark.
    ///
    /// The returned value is the current watermark whether or not it moved.
    pub fn advance(&mut self, partition: PartitionId, event_time: EventTime) -> Watermark {
        let state = self.partitions.entry(partition).or_default();
        if event_time > state.max_seen {
            state.max_seen = event_time;
        }
        let candidate = state.max_seen.saturating_sub(self.allowed_lateness_ms);
        if candidate > state.watermark {
            state.watermark = candidate;
        }
        Watermark::new(state.watermark)
    }

    /// Current watermark, or `None` if the partition has not observed an event.
    pub fn current(&self, partition: PartitionId) -> Option<Watermark> {
        self.partitions
            .get(&partition)
            .filter(|s| s.watermark != EVENT_TIME_MIN)
            .map(|s| Watermark::new(s.watermark))
    }

    /// Current watermark timestamp, `EVENT_TIME_MIN` before the first event.
    pub fn current_timestamp(&self, partition: PartitionId) -> EventTime {
        self.partitions
            .get(&partition)
            .map_or(EVENT_TIME_MIN, |s| s.watermark)
    }

    /// Whether a window ending at `window_end` has already been finalized on
    /// `partition`, which makes any event for it late.
    pub fn is_late(&self, partition: PartitionId, window_end: EventTime) -> bool {
        window_end <= self.current_timestamp(partition)
    }

    /// Minimum watermark across partitions, `None` until one is known.
    pub fn combined(&self) -> Option<Watermark> {
        self.partitions
            .values()
            .map(|s| s.watermark)
            .min()
            .filter(|&timestamp| timestamp != EVENT_TIME_MIN)
            .map(Watermark::new)
    }

    pub fn snapshot(&self) -> WatermarkSnapshot {
        WatermarkSnapshot {
            partitions: self.partitions.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: WatermarkSnapshot) {
        self.partitions = snapshot.partitions;
    }
}
