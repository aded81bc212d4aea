//! Event notifier — sequenced broadcast with backfill.
//!
//! The notifier owns the only truly shared in-memory state of the engine:
//! the sequence counter and a ring buffer of recent events. Publishing never
//! waits on subscribers; a subscriber that falls too far behind observes a
//! lag signal from the broadcast channel and must re-sync over REST.

use aegis_core::{Event, EventKind};
use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Retained events for reconnect backfill.
pub const DEFAULT_RETAIN: usize = 1000;

/// Per-subscriber broadcast queue bound; beyond this the subscriber is
/// considered lagged and gets disconnected by the transport.
const CHANNEL_CAPACITY: usize = 256;

pub struct Notifier {
    seq: AtomicU64,
    ring: Mutex<VecDeque<Event>>,
    retain: usize,
    sender: broadcast::Sender<Event>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAIN)
    }

    pub fn with_retention(retain: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Notifier {
            seq: AtomicU64::new(0),
            ring: Mutex::new(VecDeque::with_capacity(retain.min(DEFAULT_RETAIN))),
            retain: retain.max(1),
            sender,
        }
    }

    /// Publish an event. Non-blocking; returns the assigned sequence number.
    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) -> u64 {
        let event = {
            // Sequence assignment and ring insertion share the lock so that
            // ring order always equals seq order.
            let mut ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let event = Event {
                seq,
                kind,
                payload,
                emitted_at: Utc::now(),
            };
            ring.push_back(event.clone());
            while ring.len() > self.retain {
                ring.pop_front();
            }
            event
        };

        let seq = event.seq;
        // Send fails only when no subscriber exists, which is fine.
        let _ = self.sender.send(event);
        debug!(seq, "event published");
        seq
    }

    /// Subscribe, optionally resuming after `since`. The returned backfill
    /// contains every retained event with `seq > since`, in order; events
    /// published after this call arrive on the receiver.
    pub fn subscribe(&self, since: Option<u64>) -> (Vec<Event>, broadcast::Receiver<Event>) {
        let ring = self.ring.lock().unwrap_or_else(|e| e.into_inner());
        let receiver = self.sender.subscribe();
        let backfill = match since {
            Some(since) => ring.iter().filter(|e| e.seq > since).cloned().collect(),
            None => Vec::new(),
        };
        (backfill, receiver)
    }

    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    // Convenience publishers for the recognized event kinds.

    pub fn anomaly_detected(&self, anomaly_id: i64, table: &str, anomaly_type: &str) -> u64 {
        self.publish(
            EventKind::AnomalyDetected,
            json!({"anomaly_id": anomaly_id, "table": table, "type": anomaly_type}),
        )
    }

    pub fn incident_created(
        &self,
        incident_id: i64,
        severity: &str,
        table: &str,
        anomaly_type: &str,
    ) -> u64 {
        self.publish(
            EventKind::IncidentCreated,
            json!({
                "incident_id": incident_id,
                "severity": severity,
                "table": table,
                "type": anomaly_type,
            }),
        )
    }

    pub fn incident_updated(&self, incident_id: i64, status: &str, severity: &str) -> u64 {
        self.publish(
            EventKind::IncidentUpdated,
            json!({"incident_id": incident_id, "status": status, "severity": severity}),
        )
    }

    pub fn scan_completed(&self, tables_scanned: usize, anomalies_found: usize, duration_ms: u64) -> u64 {
        self.publish(
            EventKind::ScanCompleted,
            json!({
                "tables_scanned": tables_scanned,
                "anomalies_found": anomalies_found,
                "duration_ms": duration_ms,
            }),
        )
    }

    pub fn discovery_update(&self, connection_id: i64, total_deltas: usize) -> u64 {
        self.publish(
            EventKind::DiscoveryUpdate,
            json!({"connection_id": connection_id, "total_deltas": total_deltas}),
        )
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_strictly_increasing() {
        let notifier = Notifier::new();
        let a = notifier.publish(EventKind::ScanCompleted, json!({}));
        let b = notifier.publish(EventKind::ScanCompleted, json!({}));
        let c = notifier.publish(EventKind::ScanCompleted, json!({}));
        assert!(a < b && b < c);
        assert_eq!(notifier.last_seq(), c);
    }

    #[tokio::test]
    async fn live_subscribers_receive_in_seq_order() {
        let notifier = Notifier::new();
        let (_, mut rx) = notifier.subscribe(None);

        notifier.publish(EventKind::ScanCompleted, json!({"n": 1}));
        notifier.publish(EventKind::ScanCompleted, json!({"n": 2}));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.seq < second.seq);
    }

    #[test]
    fn backfill_resumes_after_gap() {
        let notifier = Notifier::new();
        let seqs: Vec<u64> = (0..5)
            .map(|n| notifier.publish(EventKind::ScanCompleted, json!({"n": n})))
            .collect();

        let (backfill, _rx) = notifier.subscribe(Some(seqs[1]));
        let got: Vec<u64> = backfill.iter().map(|e| e.seq).collect();
        assert_eq!(got, vec![seqs[2], seqs[3], seqs[4]]);
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let notifier = Notifier::with_retention(3);
        for n in 0..10 {
            notifier.publish(EventKind::ScanCompleted, json!({"n": n}));
        }
        let (backfill, _rx) = notifier.subscribe(Some(0));
        assert_eq!(backfill.len(), 3);
        assert_eq!(backfill[0].seq, 8);
        assert_eq!(backfill[2].seq, 10);
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lag_not_blocked_publisher() {
        let notifier = Notifier::new();
        let (_, mut rx) = notifier.subscribe(None);

        // Overrun the channel capacity without draining the receiver.
        for n in 0..(CHANNEL_CAPACITY * 2) {
            notifier.publish(EventKind::ScanCompleted, json!({"n": n}));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag signal, got {other:?}"),
        }
    }
}
