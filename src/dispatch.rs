//! Intervention dispatch.
//!
//! Candidates are deduplicated by cooldown key, ordered by priority with
//! FIFO tie-break, and fanned out to subscribers in dispatch order. The
//! guarantee: at most one intervention per dedup key per cooldown window.
//!
//! Subscribers receive interventions over bounded channels; a slow consumer
//! loses its own messages (counted) but never stalls dispatch.

use crate::error::EngineError;
use crate::metrics::SharedMetrics;
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use uuid::Uuid;

/// Urgency tier of an intervention. Ordered: `Critical` outranks everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for InterventionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InterventionPriority::Low => "low",
            InterventionPriority::Medium => "medium",
            InterventionPriority::High => "high",
            InterventionPriority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// An outbound intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    pub id: Uuid,
    /// Feature or coordination source, e.g. `sarcasm`, `crisis`, `unified`.
    pub kind: String,
    pub priority: InterventionPriority,
    pub dedup_key: String,
    pub message: String,
    pub evidence: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Intervention {
    pub fn new(
        kind: impl Into<String>,
        priority: InterventionPriority,
        dedup_key: impl Into<String>,
        message: impl Into<String>,
        evidence: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            priority,
            dedup_key: dedup_key.into(),
            message: message.into(),
            evidence,
            created_at,
        }
    }
}

/// Deterministic dedup key from the contributing pattern ids: the same
/// combination of causes always maps to the same key.
pub fn dedup_key_for<S: AsRef<str>>(pattern_ids: &[S]) -> String {
    let mut ids: Vec<&str> = pattern_ids.iter().map(|s| s.as_ref()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.join("+")
}

/// Dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum spacing between interventions sharing a dedup key.
    pub cooldown_ms: u64,
    /// How long cooldown entries are retained before pruning.
    pub retention_ms: u64,
    /// Bound on the analytics history log.
    pub history_cap: usize,
    /// Per-subscriber channel capacity.
    pub subscriber_queue_cap: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 30_000,
            retention_ms: 60_000,
            history_cap: 64,
            subscriber_queue_cap: 256,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cooldown_ms == 0 {
            return Err(EngineError::InvalidConfig("dispatch cooldown_ms is zero".into()));
        }
        if self.retention_ms < self.cooldown_ms {
            return Err(EngineError::InvalidConfig(format!(
                "dispatch retention_ms {} is shorter than cooldown_ms {}",
                self.retention_ms, self.cooldown_ms
            )));
        }
        if self.subscriber_queue_cap == 0 {
            return Err(EngineError::InvalidConfig(
                "dispatch subscriber_queue_cap is zero".into(),
            ));
        }
        Ok(())
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberHandle(u64);

struct Queued {
    intervention: Intervention,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.intervention.priority == other.intervention.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier submission (FIFO).
        self.intervention
            .priority
            .cmp(&other.intervention.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue with per-key cooldown in front of the subscriber fan-out.
pub struct InterventionDispatcher {
    config: DispatchConfig,
    metrics: SharedMetrics,
    queue: BinaryHeap<Queued>,
    seq: u64,
    cooldowns: HashMap<String, DateTime<Utc>>,
    subscribers: Vec<(u64, Sender<Intervention>)>,
    next_subscriber: u64,
    history: VecDeque<Intervention>,
    shutting_down: bool,
}

impl InterventionDispatcher {
    pub fn new(config: DispatchConfig, metrics: SharedMetrics) -> Self {
        Self {
            config,
            metrics,
            queue: BinaryHeap::new(),
            seq: 0,
            cooldowns: HashMap::new(),
            subscribers: Vec::new(),
            next_subscriber: 0,
            history: VecDeque::new(),
            shutting_down: false,
        }
    }

    /// Submit a candidate. Within the cooldown window of its dedup key this
    /// is a silent no-op; otherwise the candidate is queued and the window
    /// restarts.
    pub fn submit(&mut self, candidate: Intervention, now: DateTime<Utc>) -> bool {
        if self.shutting_down {
            return false;
        }
        let cooldown = Duration::milliseconds(self.config.cooldown_ms as i64);
        if let Some(last) = self.cooldowns.get(&candidate.dedup_key) {
            if now - *last < cooldown {
                self.metrics.record_intervention_suppressed();
                return false;
            }
        }
        self.cooldowns.insert(candidate.dedup_key.clone(), now);
        self.queue.push(Queued {
            intervention: candidate,
            seq: self.seq,
        });
        self.seq += 1;
        true
    }

    /// Drain the queue in priority order, delivering to every subscriber.
    /// Returns the dispatched interventions in dispatch order.
    pub fn dispatch_pending(&mut self) -> Vec<Intervention> {
        let metrics = std::sync::Arc::clone(&self.metrics);
        let mut dispatched = Vec::new();
        while let Some(queued) = self.queue.pop() {
            let intervention = queued.intervention;
            metrics.record_intervention_dispatched();

            self.subscribers.retain(|(_, sender)| {
                match sender.try_send(intervention.clone()) {
                    Ok(()) => true,
                    Err(crossbeam_channel::TrySendError::Full(_)) => {
                        metrics.record_subscriber_drop();
                        true
                    }
                    // Receiver gone: drop the subscription.
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
                }
            });

            if self.history.len() == self.config.history_cap {
                self.history.pop_front();
            }
            self.history.push_back(intervention.clone());
            dispatched.push(intervention);
        }
        dispatched
    }

    /// Register a subscriber. Dispatched interventions arrive on the
    /// returned channel in dispatch order.
    pub fn subscribe(&mut self) -> (SubscriberHandle, Receiver<Intervention>) {
        let (sender, receiver) = bounded(self.config.subscriber_queue_cap);
        let handle = SubscriberHandle(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.push((handle.0, sender));
        (handle, receiver)
    }

    pub fn unsubscribe(&mut self, handle: SubscriberHandle) {
        self.subscribers.retain(|(id, _)| *id != handle.0);
    }

    /// Drop cooldown entries past the retention horizon.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let retention = Duration::milliseconds(self.config.retention_ms as i64);
        self.cooldowns.retain(|_, last| now - *last < retention);
    }

    /// Recent dispatched interventions, oldest first.
    pub fn history(&self) -> Vec<Intervention> {
        self.history.iter().cloned().collect()
    }

    /// Stop accepting submissions and discard anything still queued.
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
        self.queue.clear();
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EngineMetrics;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn dispatcher(cooldown_ms: u64) -> InterventionDispatcher {
        let config = DispatchConfig {
            cooldown_ms,
            retention_ms: cooldown_ms.max(60_000),
            ..DispatchConfig::default()
        };
        InterventionDispatcher::new(config, Arc::new(EngineMetrics::new(t0())))
    }

    fn candidate(priority: InterventionPriority, dedup_key: &str) -> Intervention {
        Intervention::new("sarcasm", priority, dedup_key, "take a beat", vec![], t0())
    }

    #[test]
    fn dedup_key_is_order_independent() {
        assert_eq!(
            dedup_key_for(&["tone_mismatch", "sarcasm_markers"]),
            dedup_key_for(&["sarcasm_markers", "tone_mismatch"])
        );
        assert_eq!(dedup_key_for(&["a", "b", "a"]), "a+b");
    }

    #[test]
    fn same_key_within_cooldown_dispatches_once() {
        let mut dispatcher = dispatcher(2000);

        assert!(dispatcher.submit(candidate(InterventionPriority::High, "X"), t0()));
        assert!(!dispatcher.submit(
            candidate(InterventionPriority::High, "X"),
            t0() + Duration::milliseconds(500)
        ));

        let dispatched = dispatcher.dispatch_pending();
        assert_eq!(dispatched.len(), 1);
    }

    #[test]
    fn same_key_after_cooldown_fires_again() {
        let mut dispatcher = dispatcher(2000);

        assert!(dispatcher.submit(candidate(InterventionPriority::High, "X"), t0()));
        assert!(dispatcher.submit(
            candidate(InterventionPriority::High, "X"),
            t0() + Duration::milliseconds(2500)
        ));
        assert_eq!(dispatcher.dispatch_pending().len(), 2);
    }

    #[test]
    fn dispatch_order_is_priority_then_fifo() {
        let mut dispatcher = dispatcher(2000);
        dispatcher.submit(candidate(InterventionPriority::Low, "a"), t0());
        dispatcher.submit(candidate(InterventionPriority::Critical, "b"), t0());
        dispatcher.submit(candidate(InterventionPriority::Medium, "c"), t0());
        dispatcher.submit(candidate(InterventionPriority::Medium, "d"), t0());

        let order: Vec<(InterventionPriority, String)> = dispatcher
            .dispatch_pending()
            .into_iter()
            .map(|i| (i.priority, i.dedup_key))
            .collect();

        assert_eq!(
            order,
            vec![
                (InterventionPriority::Critical, "b".to_string()),
                (InterventionPriority::Medium, "c".to_string()),
                (InterventionPriority::Medium, "d".to_string()),
                (InterventionPriority::Low, "a".to_string()),
            ]
        );
    }

    #[test]
    fn subscribers_see_dispatch_order() {
        let mut dispatcher = dispatcher(2000);
        let (_handle, receiver) = dispatcher.subscribe();

        dispatcher.submit(candidate(InterventionPriority::Low, "a"), t0());
        dispatcher.submit(candidate(InterventionPriority::Critical, "b"), t0());
        dispatcher.dispatch_pending();

        let first = receiver.try_recv().unwrap();
        let second = receiver.try_recv().unwrap();
        assert_eq!(first.priority, InterventionPriority::Critical);
        assert_eq!(second.priority, InterventionPriority::Low);
    }

    #[test]
    fn unsubscribed_receivers_get_nothing() {
        let mut dispatcher = dispatcher(2000);
        let (handle, receiver) = dispatcher.subscribe();
        dispatcher.unsubscribe(handle);

        dispatcher.submit(candidate(InterventionPriority::High, "a"), t0());
        dispatcher.dispatch_pending();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn cooldown_entries_are_pruned_after_retention() {
        let mut dispatcher = dispatcher(2000);
        dispatcher.submit(candidate(InterventionPriority::High, "X"), t0());
        dispatcher.dispatch_pending();

        dispatcher.prune(t0() + Duration::seconds(61));
        assert!(dispatcher.cooldowns.is_empty());
    }

    #[test]
    fn history_is_bounded() {
        let mut dispatcher = dispatcher(2000);
        for i in 0..200 {
            dispatcher.submit(
                candidate(InterventionPriority::Low, &format!("k{i}")),
                t0() + Duration::seconds(i),
            );
        }
        dispatcher.dispatch_pending();
        assert_eq!(dispatcher.history().len(), dispatcher.config.history_cap);
    }

    #[test]
    fn shutdown_discards_queue_and_refuses_submits() {
        let mut dispatcher = dispatcher(2000);
        dispatcher.submit(candidate(InterventionPriority::High, "a"), t0());
        dispatcher.begin_shutdown();

        assert!(!dispatcher.submit(candidate(InterventionPriority::High, "b"), t0()));
        assert!(dispatcher.dispatch_pending().is_empty());
    }
}
