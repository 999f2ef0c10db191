/// Scan session: a bounded-duration scan feeding the detection aggregator
///
/// Entering Active clears the aggregator and spawns a forwarder that feeds
/// every scan report into it. Stopping (explicit or on timer expiry) flushes
/// the aggregator exactly once and reports the summaries before `Stopped`.
/// Must be used inside a Tokio runtime.

use super::aggregator::{DetectionAggregator, DetectionSummary};
use super::radio::{PermissionProvider, ScanFailure, ScanRadio, ScanReport, ScanStream};
use super::session::{
    SessionEvent, SessionKind, SessionListener, SessionState, SessionTimer, StartOutcome,
    StopReason,
};
use crate::clock::{Clock, Millis};
use crate::config::ProximityConfig;
use crate::ProximityError;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

struct ScanInner {
    state: SessionState,
    epoch: u64,
    started_at: Option<Millis>,
    aggregator: DetectionAggregator,
    forwarder: Option<JoinHandle<()>>,
    timer: SessionTimer,
    flushes: u64,
}

struct ScanShared {
    service: Uuid,
    duration: Duration,
    radio: Arc<dyn ScanRadio>,
    permissions: Arc<dyn PermissionProvider>,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn SessionListener>,
    inner: Mutex<ScanInner>,
}

/// Handle to the scan session (cheap to clone)
#[derive(Clone)]
pub struct ScanSession {
    shared: Arc<ScanShared>,
}

impl ScanSession {
    pub fn new(
        config: &ProximityConfig,
        radio: Arc<dyn ScanRadio>,
        permissions: Arc<dyn PermissionProvider>,
        clock: Arc<dyn Clock>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            shared: Arc::new(ScanShared {
                service: config.service_uuid,
                duration: config.session_duration(),
                radio,
                permissions,
                clock,
                listener,
                inner: Mutex::new(ScanInner {
                    state: SessionState::Idle,
                    epoch: 0,
                    started_at: None,
                    aggregator: DetectionAggregator::new(config.max_signal_readings),
                    forwarder: None,
                    timer: SessionTimer::default(),
                    flushes: 0,
                }),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn started_at(&self) -> Option<Millis> {
        self.shared.inner.lock().started_at
    }

    /// Devices tracked so far in the current run
    pub fn tracked_devices(&self) -> usize {
        self.shared.inner.lock().aggregator.len()
    }

    /// Number of aggregator flushes since creation
    pub fn flush_count(&self) -> u64 {
        self.shared.inner.lock().flushes
    }

    /// Request a scan. A start while already starting or active is a no-op.
    pub fn start(&self) -> Result<StartOutcome, ProximityError> {
        let shared = &self.shared;
        let epoch = {
            let mut inner = shared.inner.lock();
            if inner.state != SessionState::Idle {
                tracing::debug!("Scan start ignored: session is {}", inner.state);
                return Ok(StartOutcome::AlreadyActive);
            }
            if !shared.permissions.has_scan_permission() {
                return Err(ProximityError::PermissionDenied);
            }
            if !shared.radio.is_enabled() {
                return Err(ProximityError::RadioDisabled);
            }

            inner.epoch += 1;
            inner.state = SessionState::Starting;
            inner.epoch
        };

        tracing::debug!("Scan session {} starting", epoch);

        let radio = shared.radio.clone();
        let service = shared.service;
        let weak = Arc::downgrade(shared);
        tokio::spawn(async move {
            let result = radio.start_scan(service).await;
            match weak.upgrade() {
                Some(shared) => shared.complete_start(&Arc::downgrade(&shared), epoch, result),
                None if result.is_ok() => radio.stop_scan(),
                None => {}
            }
        });

        Ok(StartOutcome::Requested)
    }

    /// Stop scanning and report the run's detections. No-op when idle.
    pub fn stop(&self) {
        self.shared.stop_epoch(None, StopReason::Requested);
    }

    #[cfg(test)]
    fn epoch(&self) -> u64 {
        self.shared.inner.lock().epoch
    }
}

impl ScanShared {
    fn complete_start(
        &self,
        weak: &Weak<ScanShared>,
        epoch: u64,
        result: Result<ScanStream, ScanFailure>,
    ) {
        let event = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state != SessionState::Starting {
                tracing::debug!("Ignoring stale scan acknowledgment for run {}", epoch);
                if result.is_ok() && inner.state == SessionState::Idle {
                    self.radio.stop_scan();
                }
                return;
            }

            match result {
                Ok(stream) => {
                    let now = self.clock.now_millis();
                    inner.state = SessionState::Active;
                    inner.started_at = Some(now);
                    inner.aggregator.clear();
                    inner.forwarder = Some(tokio::spawn(forward(weak.clone(), epoch, stream)));

                    let weak = weak.clone();
                    inner.timer.arm(epoch, self.duration, move |epoch| {
                        if let Some(shared) = weak.upgrade() {
                            shared.stop_epoch(Some(epoch), StopReason::Expired);
                        }
                    });
                    tracing::info!("🔍 Scanning started ({} ms budget)", self.duration.as_millis());
                    SessionEvent::Started { started_at: now }
                }
                Err(failure) => {
                    inner.state = SessionState::Idle;
                    tracing::error!("Scan failed: {}", failure);
                    SessionEvent::Failed(ProximityError::ScanStartFailed { code: failure.code })
                }
            }
        };

        self.listener.on_session_event(SessionKind::Scan, event);
    }

    /// Feed one report into the aggregator. Returns false once the run is over.
    fn observe(&self, epoch: u64, report: &ScanReport) -> bool {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch || inner.state != SessionState::Active {
            return false;
        }
        let now = self.clock.now_millis();
        inner
            .aggregator
            .observe(&report.device_key, &report.payload, report.rssi, now);
        true
    }

    fn stop_epoch(&self, expected: Option<u64>, reason: StopReason) {
        let summaries: Vec<DetectionSummary> = {
            let mut inner = self.inner.lock();
            if !inner.state.is_running() {
                return;
            }
            if let Some(epoch) = expected {
                if epoch != inner.epoch {
                    tracing::warn!("Ignoring stale scan timer for run {}", epoch);
                    return;
                }
            }

            let was_active = inner.state == SessionState::Active;
            tracing::debug!("Scan session {} -> stopping", inner.state);
            inner.state = SessionState::Stopping;
            inner.epoch += 1;
            inner.timer.cancel();
            if let Some(forwarder) = inner.forwarder.take() {
                forwarder.abort();
            }
            self.radio.stop_scan();

            let summaries = if was_active {
                inner.flushes += 1;
                inner.aggregator.flush()
            } else {
                Vec::new()
            };
            inner.state = SessionState::Idle;
            inner.started_at = None;
            summaries
        };

        tracing::info!(
            "Scanning stopped ({:?}), {} device(s) detected",
            reason,
            summaries.len()
        );
        if !summaries.is_empty() {
            self.listener
                .on_session_event(SessionKind::Scan, SessionEvent::Detections(summaries));
        }
        self.listener
            .on_session_event(SessionKind::Scan, SessionEvent::Stopped { reason });
    }
}

async fn forward(weak: Weak<ScanShared>, epoch: u64, mut stream: ScanStream) {
    while let Some(report) = stream.next().await {
        let Some(shared) = weak.upgrade() else {
            break;
        };
        if !shared.observe(epoch, &report) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SERVICE_UUID;
    use crate::transport::ble::radio::{GrantedPermissions, MockPermissionProvider};
    use crate::transport::ble::session::RecordingListener;
    use crate::transport::ble::sim::{SimulatedAir, SimulatedRadio};

    const T0: u64 = 1_700_000_000_000;

    struct Harness {
        session: ScanSession,
        air: SimulatedAir,
        radio: Arc<SimulatedRadio>,
        clock: Arc<ManualClock>,
        listener: Arc<RecordingListener>,
    }

    fn harness_with(permissions: Arc<dyn PermissionProvider>) -> Harness {
        let config = ProximityConfig::default();
        let clock = Arc::new(ManualClock::new(T0));
        let air = SimulatedAir::new();
        let radio = air.radio("local");
        let listener = Arc::new(RecordingListener::default());
        let session = ScanSession::new(
            &config,
            radio.clone(),
            permissions,
            clock.clone(),
            listener.clone(),
        );
        Harness {
            session,
            air,
            radio,
            clock,
            listener,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(GrantedPermissions))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn start_active(h: &Harness) {
        h.session.start().unwrap();
        settle().await;
        assert_eq!(h.session.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detections_flow_to_listener() {
        let h = harness();
        h.air.add_beacon("peer-a", SERVICE_UUID, vec![0, 0, 0, 0x0a]);
        h.air.add_beacon("peer-b", SERVICE_UUID, vec![0, 0, 0, 0x0b]);
        start_active(&h).await;

        h.air.sweep(|key| if key == "peer-a" { -50 } else { -70 });
        settle().await;
        h.clock.advance(1_000);
        h.air.sweep(|key| if key == "peer-a" { -52 } else { -72 });
        settle().await;
        assert_eq!(h.session.tracked_devices(), 2);

        h.session.stop();
        let batches = h.listener.detections();
        assert_eq!(batches.len(), 1);
        let summaries = &batches[0];
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].identifier.id(), "ble-a");
        assert_eq!(summaries[0].average_rssi, -51);
        assert_eq!(summaries[0].first_seen, T0);
        assert_eq!(summaries[0].last_seen, T0 + 1_000);
        assert_eq!(summaries[1].identifier.id(), "ble-b");
        assert_eq!(summaries[1].average_rssi, -71);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_reports_do_not_abort_scan() {
        let h = harness();
        start_active(&h).await;

        h.air
            .inject(SERVICE_UUID, ScanReport::new("peer-x", vec![0x01], -40));
        h.air
            .inject(SERVICE_UUID, ScanReport::new("peer-y", vec![0, 0, 1, 0], -45));
        settle().await;

        assert_eq!(h.session.state(), SessionState::Active);
        h.session.stop();
        let batches = h.listener.detections();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].identifier.id(), "ble-100");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_clears_previous_run() {
        let h = harness();
        h.air.add_beacon("peer-a", SERVICE_UUID, vec![0, 0, 0, 1]);
        start_active(&h).await;
        h.air.sweep(|_| -60);
        settle().await;
        h.session.stop();

        h.air.remove_beacon("peer-a");
        start_active(&h).await;
        assert_eq!(h.session.tracked_devices(), 0);
        h.session.stop();

        // second run had nothing to report
        assert_eq!(h.listener.detections().len(), 1);
        assert_eq!(h.session.flush_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_stop_flushes() {
        let h = harness();
        h.air.add_beacon("peer-a", SERVICE_UUID, vec![0, 0, 0, 1]);
        start_active(&h).await;
        h.air.sweep(|_| -60);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(!h.radio.is_scanning());
        assert_eq!(h.listener.detections().len(), 1);
        assert_eq!(
            h.listener.count(|e| matches!(
                e,
                SessionEvent::Stopped {
                    reason: StopReason::Expired
                }
            )),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_racing_timer_flushes_once() {
        let h = harness();
        h.air.add_beacon("peer-a", SERVICE_UUID, vec![0, 0, 0, 1]);
        start_active(&h).await;
        h.air.sweep(|_| -60);
        settle().await;
        let run = h.session.epoch();

        // reach the deadline, then stop explicitly at the same instant
        tokio::time::advance(Duration::from_millis(30_000)).await;
        h.session.stop();
        h.session.shared.stop_epoch(Some(run), StopReason::Expired);
        settle().await;

        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.flush_count(), 1);
        let batches = h.listener.detections();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(h.listener.count(|e| matches!(e, SessionEvent::Stopped { .. })), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reports_after_stop_are_ignored() {
        let h = harness();
        start_active(&h).await;
        let run = h.session.epoch();
        h.session.stop();

        let late = ScanReport::new("peer-a", vec![0, 0, 0, 1], -60);
        assert!(!h.session.shared.observe(run, &late));
        assert_eq!(h.session.tracked_devices(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_surfaces() {
        let h = harness();
        h.radio.fail_scans_with(Some(ScanFailure { code: 2 }));

        h.session.start().unwrap();
        settle().await;

        assert_eq!(h.session.state(), SessionState::Idle);
        let failed: Vec<_> = h
            .listener
            .events()
            .into_iter()
            .filter_map(|(kind, e)| match e {
                SessionEvent::Failed(err) => Some((kind, err)),
                _ => None,
            })
            .collect();
        assert_eq!(
            failed,
            vec![(SessionKind::Scan, ProximityError::ScanStartFailed { code: 2 })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_permission_denied() {
        let mut permissions = MockPermissionProvider::new();
        permissions.expect_has_scan_permission().return_const(false);
        let h = harness_with(Arc::new(permissions));

        assert_eq!(h.session.start(), Err(ProximityError::PermissionDenied));
        assert_eq!(h.radio.scan_starts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_active_is_noop() {
        let h = harness();
        start_active(&h).await;
        assert_eq!(h.session.start().unwrap(), StartOutcome::AlreadyActive);
        settle().await;
        assert_eq!(h.radio.scan_starts(), 1);
    }
}
