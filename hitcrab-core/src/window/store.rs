use super::*;

/// Immutable copy of a [`WindowStateStore`], ordered by `(window.start, host)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowStoreSnapshot {
    pub windows: Vec<WindowAggregate>,
}

impl WindowStoreSnapshot {
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Open window aggregates of one worker shard, keyed by `(host, window.start)`.
///
/// Alongside the aggregates the store keeps a fire index sorted by window
/// end (the same layout as an event-time timer queue), so finding the windows
/// a watermark closes is a range scan and eviction frees both entries.
/// Memory is therefore bounded by the number of currently open windows.
///
/// # Invariant
/// Every aggregate has exactly one `end -> host -> start` entry in
/// `fire_index`, and vice versa.
#[derive(Debug, Default)]
pub struct WindowStateStore {
    /// host -> window start -> aggregate.
    windows: AHashMap<String, BTreeMap<EventTime, WindowAggregate>>,
    /// window end -> host -> window start.
    fire_index: BTreeMap<EventTime, BTreeMap<String, EventTime>>,
    open: usize,
}

impl WindowStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the window's count, creating it at zero if absent.
    ///
    /// Returns the updated count.
    pub fn update(&mut self, host: &str, window: TimeWindow, delta: u64) -> u64 {
        if let Some(aggregate) = self
            .windows
            .get_mut(host)
            .and_then(|per_host| per_host.get_mut(&window.start))
        {
            aggregate.count += delta;
            return aggregate.count;
        }

        self.fire_index
            .entry(window.end)
            .or_default()
            .insert(host.to_string(), window.start);
        self.open += 1;
        let aggregate = self
            .windows
            .entry(host.to_string())
            .or_default()
            .entry(window.start)
            .or_insert_with(|| WindowAggregate::new(host, window, 0));
        aggregate.count += delta;
        aggregate.count
    }

    pub fn get(&self, host: &str, window_start: EventTime) -> Option<&WindowAggregate> {
        self.windows.get(host)?.get(&window_start)
    }

    /// Remove a finalized window. No-op if it is not open.
    pub fn evict(&mut self, host: &str, window: &TimeWindow) -> Option<WindowAggregate> {
        let per_host = self.windows.get_mut(host)?;
        let removed = per_host.remove(&window.start)?;
        if per_host.is_empty() {
            self.windows.remove(host);
        }
        if let Some(hosts) = self.fire_index.get_mut(&removed.window.end) {
            hosts.remove(host);
            if hosts.is_empty() {
                self.fire_index.remove(&removed.window.end);
            }
        }
        self.open -= 1;
        Some(removed)
    }

    /// Copies of the open windows with `end <= watermark`, ascending by
    /// `(end, host)`. Windows are not removed; call [`evict`](Self::evict)
    /// once each has been emitted.
    pub fn due(&self, watermark: EventTime) -> Vec<WindowAggregate> {
        let mut due = Vec::new();
        for hosts in self.fire_index.range(..=watermark).map(|(_, hosts)| hosts) {
            for (host, start) in hosts {
                if let Some(aggregate) = self.get(host, *start) {
                    due.push(aggregate.clone());
                }
            }
        }
        due
    }

    /// Earliest end among open windows.
    pub fn next_window_end(&self) -> Option<EventTime> {
        self.fire_index.keys().next().copied()
    }

    /// Open windows of `host`, ascending by start.
    pub fn open_windows_for(&self, host: &str) -> Vec<TimeWindow> {
        self.windows
            .get(host)
            .map(|per_host| per_host.values().map(|agg| agg.window).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> WindowStoreSnapshot {
        let mut windows: Vec<WindowAggregate> = self
            .windows
            .values()
            .flat_map(|per_host| per_host.values().cloned())
            .collect();
        windows.sort_by(|a, b| (a.window.start, &a.host).cmp(&(b.window.start, &b.host)));
        WindowStoreSnapshot { windows }
    }

    /// Replace the whole content with `snapshot`. Used during recovery only.
    pub fn restore(&mut self, snapshot: WindowStoreSnapshot) {
        self.windows.clear();
        self.fire_index.clear();
        self.open = 0;
        for aggregate in snapshot.windows {
            self.update(&aggregate.host, aggregate.window, aggregate.count);
        }
    }

    /// Number of open windows.
    pub fn len(&self) -> usize {
        self.open
    }

    pub fn is_empty(&self) -> bool {
        self.open == 0
    }
}
