//! Windowed buffer store.
//!
//! Each pattern key owns one bounded buffer of recent [`RawSignalEvent`]s.
//! Two retention policies exist: a fixed-capacity ring (keeps the last N,
//! overwrites the oldest) and a time window (keeps entries newer than
//! `now - window`, pruned lazily). Size never exceeds the configured bound
//! and entries stay in insertion order.

use crate::signal::RawSignalEvent;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Retention policy for one buffer, as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BufferKind {
    /// Keep the last `capacity` events.
    Ring { capacity: usize },
    /// Keep events from the last `window_ms` milliseconds.
    TimeWindow { window_ms: u64 },
}

impl BufferKind {
    /// Widest retention two detectors sharing a signal key need. A time
    /// window dominates a ring; same-variant pairs take the larger bound.
    pub fn merge(self, other: BufferKind) -> BufferKind {
        match (self, other) {
            (BufferKind::Ring { capacity: a }, BufferKind::Ring { capacity: b }) => {
                BufferKind::Ring { capacity: a.max(b) }
            }
            (BufferKind::TimeWindow { window_ms: a }, BufferKind::TimeWindow { window_ms: b }) => {
                BufferKind::TimeWindow {
                    window_ms: a.max(b),
                }
            }
            (BufferKind::TimeWindow { window_ms }, BufferKind::Ring { .. })
            | (BufferKind::Ring { .. }, BufferKind::TimeWindow { window_ms }) => {
                BufferKind::TimeWindow { window_ms }
            }
        }
    }
}

/// Fixed-capacity ring of events. `add` never allocates past the capacity
/// set at construction; on overflow the oldest entry is overwritten.
#[derive(Debug)]
pub struct RingBuffer {
    capacity: usize,
    events: VecDeque<RawSignalEvent>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    fn add(&mut self, event: RawSignalEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Time-windowed sequence of events. Stale entries are dropped lazily on
/// `add` and `prune`, anchored to the newest timestamp seen.
#[derive(Debug)]
pub struct TimeWindowBuffer {
    window: Duration,
    events: VecDeque<RawSignalEvent>,
}

impl TimeWindowBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            events: VecDeque::new(),
        }
    }

    fn add(&mut self, event: RawSignalEvent) {
        let horizon = event.timestamp - self.window;
        self.events.push_back(event);
        self.drop_before(horizon);
    }

    fn drop_before(&mut self, before: DateTime<Utc>) {
        while let Some(front) = self.events.front() {
            if front.timestamp < before {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A bounded buffer of signal events for one pattern key.
#[derive(Debug)]
pub enum SignalBuffer {
    Ring(RingBuffer),
    TimeWindow(TimeWindowBuffer),
}

impl SignalBuffer {
    pub fn new(kind: BufferKind) -> Self {
        match kind {
            BufferKind::Ring { capacity } => SignalBuffer::Ring(RingBuffer::new(capacity.max(1))),
            BufferKind::TimeWindow { window_ms } => SignalBuffer::TimeWindow(TimeWindowBuffer::new(
                Duration::milliseconds(window_ms.max(1) as i64),
            )),
        }
    }

    /// Append an event. O(1) amortized; never fails.
    pub fn add(&mut self, event: RawSignalEvent) {
        match self {
            SignalBuffer::Ring(b) => b.add(event),
            SignalBuffer::TimeWindow(b) => b.add(event),
        }
    }

    /// Snapshot of all retained events with `timestamp >= since`, in
    /// insertion order. Not a live view.
    pub fn query(&self, since: DateTime<Utc>) -> Vec<RawSignalEvent> {
        self.events()
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Remove entries with `timestamp < before`.
    pub fn prune(&mut self, before: DateTime<Utc>) {
        match self {
            SignalBuffer::Ring(b) => {
                while let Some(front) = b.events.front() {
                    if front.timestamp < before {
                        b.events.pop_front();
                    } else {
                        break;
                    }
                }
            }
            SignalBuffer::TimeWindow(b) => b.drop_before(before),
        }
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events().is_empty()
    }

    /// Most recent event, if any.
    pub fn latest(&self) -> Option<&RawSignalEvent> {
        self.events().back()
    }

    fn events(&self) -> &VecDeque<RawSignalEvent> {
        match self {
            SignalBuffer::Ring(b) => &b.events,
            SignalBuffer::TimeWindow(b) => &b.events,
        }
    }
}

/// All buffers, keyed by pattern key.
///
/// Keys are registered once at startup when detectors are built; events that
/// arrive for an unregistered key are ignored by `add` (the caller counts
/// them).
#[derive(Debug, Default)]
pub struct BufferStore {
    buffers: HashMap<String, SignalBuffer>,
    windows: HashMap<String, Duration>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer for `key`. The first registration wins; callers
    /// validate kind conflicts before getting here.
    pub fn register(&mut self, key: &str, kind: BufferKind) {
        self.buffers
            .entry(key.to_string())
            .or_insert_with(|| SignalBuffer::new(kind));
        if let BufferKind::TimeWindow { window_ms } = kind {
            let window = Duration::milliseconds(window_ms.max(1) as i64);
            let entry = self.windows.entry(key.to_string()).or_insert(window);
            if window > *entry {
                *entry = window;
            }
        }
    }

    /// Route an event to its buffer. Returns false when no buffer exists for
    /// the event's key.
    pub fn add(&mut self, event: RawSignalEvent) -> bool {
        match self.buffers.get_mut(&event.key) {
            Some(buffer) => {
                buffer.add(event);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&SignalBuffer> {
        self.buffers.get(key)
    }

    /// Snapshot of events in `key` with `timestamp >= since`.
    pub fn query(&self, key: &str, since: DateTime<Utc>) -> Vec<RawSignalEvent> {
        self.buffers
            .get(key)
            .map(|b| b.query(since))
            .unwrap_or_default()
    }

    /// Drop stale entries from every time-window buffer, each against its
    /// own registered window. Rings are bounded by construction.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        for (key, window) in &self.windows {
            if let Some(buffer) = self.buffers.get_mut(key) {
                buffer.prune(now - *window);
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::RawSignalEvent;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn cursor_at(offset_ms: i64) -> RawSignalEvent {
        RawSignalEvent::cursor(t0() + Duration::milliseconds(offset_ms), "cursor", 1.0)
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let mut buffer = SignalBuffer::new(BufferKind::Ring { capacity: 8 });
        for i in 0..100 {
            buffer.add(cursor_at(i));
            assert!(buffer.len() <= 8);
        }
        // Oldest were overwritten, not queued.
        let events = buffer.query(t0());
        assert_eq!(events.len(), 8);
        assert_eq!(events[0].timestamp, t0() + Duration::milliseconds(92));
    }

    #[test]
    fn time_window_drops_stale_entries_on_add() {
        let mut buffer = SignalBuffer::new(BufferKind::TimeWindow { window_ms: 1000 });
        buffer.add(cursor_at(0));
        buffer.add(cursor_at(500));
        buffer.add(cursor_at(1600));

        assert_eq!(buffer.len(), 2);
        let events = buffer.query(t0());
        assert_eq!(events[0].timestamp, t0() + Duration::milliseconds(500));
    }

    #[test]
    fn query_respects_since_and_insertion_order() {
        let mut buffer = SignalBuffer::new(BufferKind::Ring { capacity: 16 });
        for i in 0..5 {
            buffer.add(cursor_at(i * 100));
        }

        let events = buffer.query(t0() + Duration::milliseconds(200));
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn prune_removes_nothing_newer_than_cutoff() {
        let mut buffer = SignalBuffer::new(BufferKind::TimeWindow { window_ms: 60_000 });
        for i in 0..10 {
            buffer.add(cursor_at(i * 1000));
        }

        let cutoff = t0() + Duration::milliseconds(5000);
        buffer.prune(cutoff);
        assert!(buffer.query(t0()).iter().all(|e| e.timestamp >= cutoff));
    }

    #[test]
    fn store_routes_by_key_and_reports_unknown() {
        let mut store = BufferStore::new();
        store.register("cursor", BufferKind::Ring { capacity: 4 });

        assert!(store.add(cursor_at(0)));
        assert!(!store.add(RawSignalEvent::text(t0(), "conversation", "hi")));
        assert_eq!(store.query("cursor", t0()).len(), 1);
    }

    #[test]
    fn store_prunes_time_windows_against_their_own_horizon() {
        let mut store = BufferStore::new();
        store.register("window_focus", BufferKind::TimeWindow { window_ms: 2000 });
        store.add(RawSignalEvent::window_focus(t0(), "window_focus", "app-a"));
        store.add(RawSignalEvent::window_focus(
            t0() + Duration::milliseconds(1500),
            "window_focus",
            "app-b",
        ));

        store.prune_expired(t0() + Duration::milliseconds(2500));
        assert_eq!(store.query("window_focus", t0()).len(), 1);
    }

    #[test]
    fn register_is_idempotent() {
        let mut store = BufferStore::new();
        store.register("cursor", BufferKind::Ring { capacity: 4 });
        store.register("cursor", BufferKind::Ring { capacity: 99 });

        for i in 0..10 {
            store.add(cursor_at(i));
        }
        // First registration won.
        assert_eq!(store.query("cursor", t0()).len(), 4);
    }

    #[test]
    fn merge_takes_the_widest_retention() {
        let ring = BufferKind::Ring { capacity: 16 };
        let window = BufferKind::TimeWindow { window_ms: 30_000 };
        let wider = BufferKind::TimeWindow { window_ms: 60_000 };

        assert_eq!(ring.merge(window), window);
        assert_eq!(window.merge(wider), wider);
        assert_eq!(
            ring.merge(BufferKind::Ring { capacity: 32 }),
            BufferKind::Ring { capacity: 32 }
        );
    }
}
