/// Detection aggregation for one scan session
///
/// Observations are keyed by device key while collecting and reported keyed
/// by the decoded remote identifier. Each device keeps only its most recent
/// readings, so the reported average is weighted towards recent signal
/// strength.

use crate::clock::Millis;
use crate::identity::{self, Identifier};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Tracked state for one device key
#[derive(Debug, Clone)]
pub struct Detection {
    identifier: Identifier,
    readings: VecDeque<i16>,
    first_seen: Millis,
    last_seen: Millis,
}

impl Detection {
    fn new(identifier: Identifier, rssi: i16, now: Millis, capacity: usize) -> Self {
        let mut readings = VecDeque::with_capacity(capacity);
        readings.push_back(rssi);
        Self {
            identifier,
            readings,
            first_seen: now,
            last_seen: now,
        }
    }

    fn record(&mut self, rssi: i16, now: Millis, max_readings: usize) {
        if self.readings.len() == max_readings {
            self.readings.pop_front();
        }
        self.readings.push_back(rssi);
        self.last_seen = self.last_seen.max(now);
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn readings(&self) -> impl Iterator<Item = i16> + '_ {
        self.readings.iter().copied()
    }

    pub fn first_seen(&self) -> Millis {
        self.first_seen
    }

    pub fn last_seen(&self) -> Millis {
        self.last_seen
    }

    /// Mean of the retained readings, truncated toward zero
    pub fn average_rssi(&self) -> i32 {
        let sum: i64 = self.readings.iter().map(|&r| i64::from(r)).sum();
        let count = self.readings.len().max(1) as i64;
        (sum / count) as i32
    }

    fn summarize(&self) -> DetectionSummary {
        DetectionSummary {
            identifier: self.identifier.clone(),
            average_rssi: self.average_rssi(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }
}

/// One summarized detection, produced when a scan session ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionSummary {
    pub identifier: Identifier,
    pub average_rssi: i32,
    pub first_seen: Millis,
    pub last_seen: Millis,
}

impl DetectionSummary {
    /// Rough distance in meters from the average RSSI.
    ///
    /// Free-space path loss against an assumed -59 dBm at one meter. Only a
    /// proximity hint: walls, bodies and antenna orientation dominate.
    pub fn estimate_distance_m(&self) -> f64 {
        const TX_POWER_AT_ONE_METER: f64 = -59.0;
        10f64.powf((TX_POWER_AT_ONE_METER - self.average_rssi as f64) / 20.0)
    }

    pub fn duration_ms(&self) -> Millis {
        self.last_seen.saturating_sub(self.first_seen)
    }
}

/// Collects observations until flushed
pub struct DetectionAggregator {
    max_readings: usize,
    devices: HashMap<String, Detection>,
    order: Vec<String>,
}

impl DetectionAggregator {
    pub fn new(max_readings: usize) -> Self {
        Self {
            max_readings: max_readings.max(1),
            devices: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Record one observation. Returns false if the payload did not decode.
    ///
    /// A device key keeps the identifier decoded from its first observation
    /// for the rest of the session.
    pub fn observe(&mut self, device_key: &str, payload: &[u8], rssi: i16, now: Millis) -> bool {
        if let Some(detection) = self.devices.get_mut(device_key) {
            if identity::codec::decode_value(payload).is_err() {
                tracing::debug!("Dropping undecodable payload from {}", device_key);
                return false;
            }
            detection.record(rssi, now, self.max_readings);
            return true;
        }

        match identity::decode(payload, now) {
            Ok(identifier) => {
                tracing::debug!("New device {} carrying {}", device_key, identifier);
                self.devices.insert(
                    device_key.to_string(),
                    Detection::new(identifier, rssi, now, self.max_readings),
                );
                self.order.push(device_key.to_string());
                true
            }
            Err(e) => {
                tracing::debug!("Dropping observation from {}: {}", device_key, e);
                false
            }
        }
    }

    /// Summarize every tracked device in first-seen order and clear
    pub fn flush(&mut self) -> Vec<DetectionSummary> {
        let summaries = self
            .order
            .drain(..)
            .filter_map(|key| self.devices.get(&key).map(Detection::summarize))
            .collect();
        self.devices.clear();
        summaries
    }

    /// Discard tracked state without reporting it
    pub fn clear(&mut self) {
        self.devices.clear();
        self.order.clear();
    }

    pub fn get(&self, device_key: &str) -> Option<&Detection> {
        self.devices.get(device_key)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
