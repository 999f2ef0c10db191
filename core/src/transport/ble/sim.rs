/// In-process radio simulation
///
/// `SimulatedAir` is a shared medium: radios register broadcasts and scans on
/// it, and `sweep()` delivers every live broadcast to every scanner filtering
/// on the same service UUID. Used by the tests and the CLI demo in place of
/// platform radio code.

use super::radio::{AdvertiseFailure, BroadcastRadio, ScanFailure, ScanRadio, ScanReport, ScanStream};
use crate::identity::Payload;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

struct Listener {
    service: Uuid,
    sink: mpsc::UnboundedSender<ScanReport>,
}

#[derive(Default)]
struct AirState {
    broadcasts: BTreeMap<String, (Uuid, Vec<u8>)>,
    listeners: BTreeMap<String, Listener>,
}

/// Shared simulated medium
#[derive(Clone, Default)]
pub struct SimulatedAir {
    state: Arc<Mutex<AirState>>,
}

impl SimulatedAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio attached to this medium under `device_key`
    pub fn radio(&self, device_key: impl Into<String>) -> Arc<SimulatedRadio> {
        Arc::new(SimulatedRadio {
            device_key: device_key.into(),
            air: self.clone(),
            enabled: AtomicBool::new(true),
            advertise_failure: Mutex::new(None),
            scan_failure: Mutex::new(None),
            broadcast_starts: AtomicUsize::new(0),
            scan_starts: AtomicUsize::new(0),
            last_payload: Mutex::new(None),
        })
    }

    /// A fixed broadcaster with no radio behind it
    pub fn add_beacon(&self, device_key: impl Into<String>, service: Uuid, payload: impl Into<Vec<u8>>) {
        self.state
            .lock()
            .broadcasts
            .insert(device_key.into(), (service, payload.into()));
    }

    pub fn remove_beacon(&self, device_key: &str) {
        self.state.lock().broadcasts.remove(device_key);
    }

    /// Deliver one raw report to every scanner on `service`
    pub fn inject(&self, service: Uuid, report: ScanReport) -> usize {
        let state = self.state.lock();
        state
            .listeners
            .iter()
            .filter(|(key, l)| l.service == service && **key != report.device_key)
            .filter(|(_, l)| l.sink.unbounded_send(report.clone()).is_ok())
            .count()
    }

    /// Deliver every live broadcast to every scanner on the same service.
    /// `rssi` picks the signal strength for each broadcaster key.
    pub fn sweep(&self, mut rssi: impl FnMut(&str) -> i16) -> usize {
        let state = self.state.lock();
        let mut delivered = 0;
        for (key, (service, payload)) in &state.broadcasts {
            let report = ScanReport::new(key.clone(), payload.clone(), rssi(key));
            for (listener_key, listener) in &state.listeners {
                if listener_key == key || listener.service != *service {
                    continue;
                }
                if listener.sink.unbounded_send(report.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub fn broadcaster_count(&self) -> usize {
        self.state.lock().broadcasts.len()
    }

    pub fn scanner_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    fn start_broadcast(&self, device_key: &str, service: Uuid, payload: Vec<u8>) {
        self.state
            .lock()
            .broadcasts
            .insert(device_key.to_string(), (service, payload));
    }

    fn start_scan(&self, device_key: &str, service: Uuid) -> ScanStream {
        let (sink, stream) = mpsc::unbounded();
        self.state
            .lock()
            .listeners
            .insert(device_key.to_string(), Listener { service, sink });
        stream.boxed()
    }

    fn stop_scan(&self, device_key: &str) {
        // dropping the sender ends the stream
        self.state.lock().listeners.remove(device_key);
    }
}

/// A radio on a `SimulatedAir` with failure injection and call counters
pub struct SimulatedRadio {
    device_key: String,
    air: SimulatedAir,
    enabled: AtomicBool,
    advertise_failure: Mutex<Option<AdvertiseFailure>>,
    scan_failure: Mutex<Option<ScanFailure>>,
    broadcast_starts: AtomicUsize,
    scan_starts: AtomicUsize,
    last_payload: Mutex<Option<Payload>>,
}

impl SimulatedRadio {
    pub fn device_key(&self) -> &str {
        &self.device_key
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Reject subsequent broadcast starts with `failure` (None to accept)
    pub fn fail_broadcasts_with(&self, failure: Option<AdvertiseFailure>) {
        *self.advertise_failure.lock() = failure;
    }

    /// Reject subsequent scan starts with `failure` (None to accept)
    pub fn fail_scans_with(&self, failure: Option<ScanFailure>) {
        *self.scan_failure.lock() = failure;
    }

    /// Number of broadcast start requests received
    pub fn broadcast_starts(&self) -> usize {
        self.broadcast_starts.load(Ordering::SeqCst)
    }

    /// Number of scan start requests received
    pub fn scan_starts(&self) -> usize {
        self.scan_starts.load(Ordering::SeqCst)
    }

    /// Payload of the most recent accepted broadcast
    pub fn last_payload(&self) -> Option<Payload> {
        *self.last_payload.lock()
    }

    pub fn is_broadcasting(&self) -> bool {
        self.air.state.lock().broadcasts.contains_key(&self.device_key)
    }

    pub fn is_scanning(&self) -> bool {
        self.air.state.lock().listeners.contains_key(&self.device_key)
    }
}

#[async_trait]
impl BroadcastRadio for SimulatedRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn start_broadcast(&self, service: Uuid, payload: Payload) -> Result<(), AdvertiseFailure> {
        self.broadcast_starts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = *self.advertise_failure.lock() {
            return Err(failure);
        }
        self.air.start_broadcast(&self.device_key, service, payload.to_vec());
        *self.last_payload.lock() = Some(payload);
        Ok(())
    }

    fn stop_broadcast(&self) {
        self.air.remove_beacon(&self.device_key);
    }
}

#[async_trait]
impl ScanRadio for SimulatedRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn start_scan(&self, service: Uuid) -> Result<ScanStream, ScanFailure> {
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = *self.scan_failure.lock() {
            return Err(failure);
        }
        Ok(self.air.start_scan(&self.device_key, service))
    }

    fn stop_scan(&self) {
        self.air.stop_scan(&self.device_key);
    }
}
