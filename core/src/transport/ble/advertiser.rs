/// Advertise session: a bounded-duration broadcast of the current identifier
///
/// `start()` only requests the transition; the radio acknowledgment and the
/// duration timer arrive on spawned tasks and are applied under the session
/// lock. Every run gets a fresh epoch, and acknowledgments or timer firings
/// carrying an older epoch are ignored. Must be used inside a Tokio runtime.

use super::radio::{AdvertiseFailure, BroadcastRadio, PermissionProvider};
use super::session::{
    SessionEvent, SessionKind, SessionListener, SessionState, SessionTimer, StartOutcome,
    StopReason,
};
use crate::clock::{Clock, Millis};
use crate::config::ProximityConfig;
use crate::identity::{Identifier, IdentifierManager, Payload};
use crate::ProximityError;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use uuid::Uuid;

struct AdvertiseInner {
    state: SessionState,
    epoch: u64,
    started_at: Option<Millis>,
    payload: Option<Payload>,
    timer: SessionTimer,
}

struct AdvertiseShared {
    service: Uuid,
    duration: Duration,
    restart_grace: Duration,
    radio: Arc<dyn BroadcastRadio>,
    permissions: Arc<dyn PermissionProvider>,
    identifiers: Arc<IdentifierManager>,
    clock: Arc<dyn Clock>,
    listener: Arc<dyn SessionListener>,
    inner: Mutex<AdvertiseInner>,
}

/// Result of `AdvertiseSession::rotate_and_restart`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    /// The identifier now current; the rotation is never undone
    pub identifier: Identifier,
    /// Restart request result, `None` when the session was idle
    pub restart: Option<Result<StartOutcome, ProximityError>>,
}

/// Handle to the advertise session (cheap to clone)
#[derive(Clone)]
pub struct AdvertiseSession {
    shared: Arc<AdvertiseShared>,
}

impl AdvertiseSession {
    pub fn new(
        config: &ProximityConfig,
        radio: Arc<dyn BroadcastRadio>,
        permissions: Arc<dyn PermissionProvider>,
        identifiers: Arc<IdentifierManager>,
        clock: Arc<dyn Clock>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            shared: Arc::new(AdvertiseShared {
                service: config.service_uuid,
                duration: config.session_duration(),
                restart_grace: config.restart_grace(),
                radio,
                permissions,
                identifiers,
                clock,
                listener,
                inner: Mutex::new(AdvertiseInner {
                    state: SessionState::Idle,
                    epoch: 0,
                    started_at: None,
                    payload: None,
                    timer: SessionTimer::default(),
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

    /// Payload of the current (or pending) broadcast
    pub fn payload(&self) -> Option<Payload> {
        self.shared.inner.lock().payload
    }

    /// Request a broadcast of the current identifier.
    ///
    /// A start while already starting or active is a no-op. Permission and
    /// radio checks fail synchronously; a rejection by the radio is reported
    /// later as `SessionEvent::Failed`.
    pub fn start(&self) -> Result<StartOutcome, ProximityError> {
        let shared = &self.shared;
        // may rotate (and hit the store), so read it before taking the session lock
        let payload = shared.identifiers.current_payload();
        let epoch = {
            let mut inner = shared.inner.lock();
            if inner.state != SessionState::Idle {
                tracing::debug!("Advertise start ignored: session is {}", inner.state);
                return Ok(StartOutcome::AlreadyActive);
            }
            if !shared.permissions.has_broadcast_permission() {
                return Err(ProximityError::PermissionDenied);
            }
            if !shared.radio.is_enabled() {
                return Err(ProximityError::RadioDisabled);
            }

            inner.epoch += 1;
            inner.state = SessionState::Starting;
            inner.payload = Some(payload);
            inner.epoch
        };

        tracing::debug!(
            "Advertise session {} starting with payload {}",
            epoch,
            hex::encode(payload)
        );

        let radio = shared.radio.clone();
        let service = shared.service;
        let weak = Arc::downgrade(shared);
        tokio::spawn(async move {
            let result = radio.start_broadcast(service, payload).await;
            match weak.upgrade() {
                Some(shared) => shared.complete_start(&Arc::downgrade(&shared), epoch, result),
                None if result.is_ok() => radio.stop_broadcast(),
                None => {}
            }
        });

        Ok(StartOutcome::Requested)
    }

    /// Stop broadcasting. No-op when idle.
    pub fn stop(&self) {
        self.shared.stop_epoch(None, StopReason::Requested);
    }

    /// Rotate the identifier, restarting the broadcast if it was running.
    ///
    /// The broadcast is stopped before rotating and restarted with the new
    /// payload after the restart grace period. When idle this only rotates.
    /// A failed restart leaves the session idle with the new identifier.
    pub async fn rotate_and_restart(&self) -> Rotation {
        let was_running = self.state().is_running();
        if was_running {
            self.stop();
        }

        let identifier = self.shared.identifiers.rotate();

        let restart = if was_running {
            tokio::time::sleep(self.shared.restart_grace).await;
            let result = self.start();
            if let Err(e) = &result {
                tracing::warn!("Restart after rotation to {} failed: {}", identifier, e);
            }
            Some(result)
        } else {
            None
        };

        Rotation {
            identifier,
            restart,
        }
    }

    #[cfg(test)]
    fn epoch(&self) -> u64 {
        self.shared.inner.lock().epoch
    }
}

impl AdvertiseShared {
    fn complete_start(
        &self,
        weak: &Weak<AdvertiseShared>,
        epoch: u64,
        result: Result<(), AdvertiseFailure>,
    ) {
        let event = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch || inner.state != SessionState::Starting {
                tracing::debug!("Ignoring stale advertise acknowledgment for run {}", epoch);
                if result.is_ok() && inner.state == SessionState::Idle {
                    self.radio.stop_broadcast();
                }
                return;
            }

            match result {
                Ok(()) => {
                    let now = self.clock.now_millis();
                    inner.state = SessionState::Active;
                    inner.started_at = Some(now);

                    let weak = weak.clone();
                    inner.timer.arm(epoch, self.duration, move |epoch| {
                        if let Some(shared) = weak.upgrade() {
                            shared.stop_epoch(Some(epoch), StopReason::Expired);
                        }
                    });
                    tracing::info!("📡 Advertising started ({} ms budget)", self.duration.as_millis());
                    SessionEvent::Started { started_at: now }
                }
                Err(failure) => {
                    inner.state = SessionState::Idle;
                    inner.payload = None;
                    tracing::error!("Advertising failed: {} (code {})", failure, failure.code());
                    SessionEvent::Failed(ProximityError::BroadcastStartFailed { reason: failure })
                }
            }
        };

        self.listener.on_session_event(SessionKind::Advertise, event);
    }

    /// Stop the run identified by `expected` (any run if None)
    fn stop_epoch(&self, expected: Option<u64>, reason: StopReason) {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_running() {
                return;
            }
            if let Some(epoch) = expected {
                if epoch != inner.epoch {
                    tracing::warn!("Ignoring stale advertise timer for run {}", epoch);
                    return;
                }
            }

            tracing::debug!("Advertise session {} -> stopping", inner.state);
            inner.state = SessionState::Stopping;
            inner.epoch += 1;
            inner.timer.cancel();
            self.radio.stop_broadcast();
            inner.state = SessionState::Idle;
            inner.started_at = None;
            inner.payload = None;
        }

        tracing::info!("Advertising stopped ({:?})", reason);
        self.listener
            .on_session_event(SessionKind::Advertise, SessionEvent::Stopped { reason });
    }
}
