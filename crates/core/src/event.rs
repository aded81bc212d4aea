//! Lifecycle events broadcast by the notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recognized event kinds, serialized with their dotted wire names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventKind {
    #[serde(rename = "anomaly.detected")]
    AnomalyDetected,
    #[serde(rename = "incident.created")]
    IncidentCreated,
    #[serde(rename = "incident.updated")]
    IncidentUpdated,
    #[serde(rename = "scan.completed")]
    ScanCompleted,
    #[serde(rename = "discovery.update")]
    DiscoveryUpdate,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AnomalyDetected => "anomaly.detected",
            EventKind::IncidentCreated => "incident.created",
            EventKind::IncidentUpdated => "incident.updated",
            EventKind::ScanCompleted => "scan.completed",
            EventKind::DiscoveryUpdate => "discovery.update",
        }
    }
}

/// A sequenced event. `seq` is assigned by the notifier and is strictly
/// increasing; subscribers rely on it for ordering and backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    #[serde(rename = "event")]
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_dotted_wire_names() {
        let json = serde_json::to_string(&EventKind::IncidentCreated).unwrap();
        assert_eq!(json, "\"incident.created\"");
    }
}
