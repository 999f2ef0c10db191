// Proximity event records built from scan summaries

use crate::clock::Millis;
use crate::identity::Identifier;
use crate::transport::DetectionSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One encounter between the local identifier and a remote one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityEvent {
    pub id: Uuid,
    /// Local identifier at the time the scan session ended
    pub local_user_id: String,
    pub remote_user_id: String,
    /// First time the remote identifier was seen (receiver clock)
    pub timestamp: Millis,
    /// Average RSSI over the retained readings
    pub rssi: i32,
    /// Time between first and last sighting
    pub duration_ms: Millis,
}

impl ProximityEvent {
    pub fn from_summary(local: &Identifier, summary: &DetectionSummary) -> Self {
        Self {
            id: Uuid::new_v4(),
            local_user_id: local.id().to_string(),
            remote_user_id: summary.identifier.id().to_string(),
            timestamp: summary.first_seen,
            rssi: summary.average_rssi,
            duration_ms: summary.duration_ms(),
        }
    }
}
