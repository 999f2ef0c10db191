// Proxtrace Core — rotating BLE identifiers and proximity detection
//
// Broadcast a short anonymous identifier, scan for everyone else's, and
// turn the noisy sightings into one summary per remote identifier.

pub mod clock;
pub mod config;
pub mod identity;
pub mod proximity;
pub mod store;
pub mod transport;

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub use clock::{Clock, ManualClock, Millis, SystemClock};
pub use config::{ConfigError, ProximityConfig, SERVICE_UUID};
pub use identity::{
    BackendIdentifierStore, DecodeError, Identifier, IdentifierManager, IdentifierStore,
    StoredIdentifier,
};
pub use proximity::ProximityEvent;
pub use store::{MemoryStorage, SledStorage, StorageBackend, StoreError};
pub use transport::ble::{
    AdvertiseFailure, AdvertiseSession, BroadcastRadio, DetectionSummary, GrantedPermissions,
    PermissionProvider, Rotation, ScanFailure, ScanRadio, ScanReport, ScanSession,
    SessionEvent, SessionKind, SessionListener, SessionState, SimulatedAir, SimulatedRadio,
    StartOutcome, StopReason,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProximityError {
    #[error("Bluetooth permission denied")]
    PermissionDenied,
    #[error("Bluetooth is disabled")]
    RadioDisabled,
    #[error("Advertising failed: {reason}")]
    BroadcastStartFailed { reason: AdvertiseFailure },
    #[error("Scan failed with code {code}")]
    ScanStartFailed { code: i32 },
    #[error("Persistence failure: {0}")]
    Persistence(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

impl From<StoreError> for ProximityError {
    fn from(err: StoreError) -> Self {
        ProximityError::Persistence(err.to_string())
    }
}

// ============================================================================
// DATA TYPES
// ============================================================================

/// External capabilities the core runs against
#[derive(Clone)]
pub struct ProximityCapabilities {
    pub store: Arc<dyn IdentifierStore>,
    pub broadcast: Arc<dyn BroadcastRadio>,
    pub scan: Arc<dyn ScanRadio>,
    pub permissions: Arc<dyn PermissionProvider>,
    pub clock: Arc<dyn Clock>,
}

impl ProximityCapabilities {
    pub fn new(
        store: Arc<dyn IdentifierStore>,
        broadcast: Arc<dyn BroadcastRadio>,
        scan: Arc<dyn ScanRadio>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Self {
        Self {
            store,
            broadcast,
            scan,
            permissions,
            clock: Arc::new(SystemClock),
        }
    }

    /// Both radio halves backed by one simulated radio on `air`
    pub fn simulated(
        air: &SimulatedAir,
        device_key: impl Into<String>,
        store: Arc<dyn IdentifierStore>,
    ) -> Self {
        let radio = air.radio(device_key);
        Self::new(store, radio.clone(), radio, Arc::new(GrantedPermissions))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Read-only view for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct ProximitySnapshot {
    pub identifier: Identifier,
    pub advertise_state: SessionState,
    pub scan_state: SessionState,
    pub advertising: bool,
    pub scanning: bool,
    pub detections: Vec<DetectionSummary>,
    pub last_error: Option<String>,
}

// ============================================================================
// PROXIMITY DELEGATE TRAIT
// ============================================================================

/// Callback interface for the presentation layer
pub trait ProximityDelegate: Send + Sync {
    /// A scan session ended with this remote identifier in range
    fn on_device_detected(&self, summary: DetectionSummary);
    fn on_advertising_changed(&self, advertising: bool);
    fn on_scanning_changed(&self, scanning: bool);
    fn on_identifier_changed(&self, identifier: Identifier);
    /// User-visible error message
    fn on_error(&self, message: String);
}

// ============================================================================
// CORE STATE
// ============================================================================

/// Session sink: collects detections, events and the last error
struct CoreState {
    identifiers: Arc<IdentifierManager>,
    detections: RwLock<Vec<DetectionSummary>>,
    events: RwLock<Vec<ProximityEvent>>,
    last_error: RwLock<Option<ProximityError>>,
    delegate: RwLock<Option<Arc<dyn ProximityDelegate>>>,
}

impl CoreState {
    fn delegate(&self) -> Option<Arc<dyn ProximityDelegate>> {
        self.delegate.read().clone()
    }

    /// Overwrites any unread error
    fn record_error(&self, error: ProximityError) {
        tracing::warn!("Proximity error: {}", error);
        *self.last_error.write() = Some(error.clone());
        if let Some(delegate) = self.delegate() {
            delegate.on_error(error.to_string());
        }
    }
}

impl SessionListener for CoreState {
    fn on_session_event(&self, kind: SessionKind, event: SessionEvent) {
        match event {
            SessionEvent::Started { .. } => {
                if let Some(delegate) = self.delegate() {
                    match kind {
                        SessionKind::Advertise => delegate.on_advertising_changed(true),
                        SessionKind::Scan => delegate.on_scanning_changed(true),
                    }
                }
            }
            SessionEvent::Stopped { .. } => {
                if let Some(delegate) = self.delegate() {
                    match kind {
                        SessionKind::Advertise => delegate.on_advertising_changed(false),
                        SessionKind::Scan => delegate.on_scanning_changed(false),
                    }
                }
            }
            SessionEvent::Detections(summaries) => {
                // runs on the session's stop path, so no lazy rotation here
                let local = self.identifiers.peek();
                self.events.write().extend(
                    summaries
                        .iter()
                        .map(|summary| ProximityEvent::from_summary(&local, summary)),
                );
                self.detections.write().extend(summaries.iter().cloned());

                if let Some(delegate) = self.delegate() {
                    for summary in summaries {
                        delegate.on_device_detected(summary);
                    }
                }
            }
            SessionEvent::Failed(error) => self.record_error(error),
        }
    }
}

// ============================================================================
// PROXIMITY CORE IMPLEMENTATION
// ============================================================================

/// Coordinates the identifier manager and the two sessions.
///
/// Session operations spawn Tokio tasks, so the core must be driven from
/// inside a Tokio runtime.
#[derive(Clone)]
pub struct ProximityCore {
    config: ProximityConfig,
    identifiers: Arc<IdentifierManager>,
    advertiser: AdvertiseSession,
    scanner: ScanSession,
    state: Arc<CoreState>,
}

impl ProximityCore {
    pub fn new(
        config: ProximityConfig,
        capabilities: ProximityCapabilities,
    ) -> Result<Self, ProximityError> {
        // Initialize tracing (idempotent)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();

        config.validate()?;

        let identifiers = Arc::new(IdentifierManager::new(
            capabilities.store.clone(),
            capabilities.clock.clone(),
            &config,
        ));
        let state = Arc::new(CoreState {
            identifiers: identifiers.clone(),
            detections: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
            delegate: RwLock::new(None),
        });

        let advertiser = AdvertiseSession::new(
            &config,
            capabilities.broadcast.clone(),
            capabilities.permissions.clone(),
            identifiers.clone(),
            capabilities.clock.clone(),
            state.clone(),
        );
        let scanner = ScanSession::new(
            &config,
            capabilities.scan.clone(),
            capabilities.permissions.clone(),
            capabilities.clock.clone(),
            state.clone(),
        );

        tracing::info!(
            "Proxtrace core ready, identifier {}",
            identifiers.current_identifier()
        );

        let core = Self {
            config,
            identifiers,
            advertiser,
            scanner,
            state,
        };
        core.report_persistence_failure();
        Ok(core)
    }

    pub fn config(&self) -> &ProximityConfig {
        &self.config
    }

    pub fn set_delegate(&self, delegate: Option<Box<dyn ProximityDelegate>>) {
        *self.state.delegate.write() = delegate.map(|d| Arc::from(d) as Arc<dyn ProximityDelegate>);
    }

    /// Record a synchronous failure in the error slot before returning it
    fn reported<T>(&self, result: Result<T, ProximityError>) -> Result<T, ProximityError> {
        if let Err(e) = &result {
            self.state.record_error(e.clone());
        }
        result
    }

    /// Like `reported`, and a fresh start also clears the error slot
    fn started(
        &self,
        result: Result<StartOutcome, ProximityError>,
    ) -> Result<StartOutcome, ProximityError> {
        let result = self.reported(result);
        if result == Ok(StartOutcome::Requested) {
            self.clear_error();
        }
        result
    }

    /// Surface a save the identifier manager gave up on
    fn report_persistence_failure(&self) {
        if let Some(err) = self.identifiers.take_persistence_failure() {
            self.state.record_error(err.into());
        }
    }

    // ------------------------------------------------------------------------
    // SESSIONS
    // ------------------------------------------------------------------------

    pub fn start_advertising(&self) -> Result<StartOutcome, ProximityError> {
        let result = self.started(self.advertiser.start());
        self.report_persistence_failure();
        result
    }

    pub fn stop_advertising(&self) {
        self.advertiser.stop();
    }

    /// Start a scan session. Detections from earlier sessions are cleared.
    pub fn start_scanning(&self) -> Result<StartOutcome, ProximityError> {
        let outcome = self.started(self.scanner.start())?;
        if outcome == StartOutcome::Requested {
            self.state.detections.write().clear();
        }
        Ok(outcome)
    }

    pub fn stop_scanning(&self) {
        self.scanner.stop();
    }

    /// Rotate the identifier; a running broadcast is restarted with the new payload.
    ///
    /// The rotation always takes effect. A failed restart is reported through
    /// the error slot and leaves advertising stopped.
    pub async fn rotate_identifier(&self) -> Identifier {
        let rotation = self.advertiser.rotate_and_restart().await;

        if let Some(delegate) = self.state.delegate() {
            delegate.on_identifier_changed(rotation.identifier.clone());
        }
        if let Some(restart) = rotation.restart {
            let _ = self.started(restart);
        }
        self.report_persistence_failure();
        rotation.identifier
    }

    /// Stop both sessions
    pub fn shutdown(&self) {
        tracing::info!("Proxtrace core shutting down");
        self.advertiser.stop();
        self.scanner.stop();
    }

    // ------------------------------------------------------------------------
    // OBSERVATION
    // ------------------------------------------------------------------------

    pub fn current_identifier(&self) -> Identifier {
        let identifier = self.identifiers.current_identifier();
        self.report_persistence_failure();
        identifier
    }

    pub fn is_advertising(&self) -> bool {
        self.advertiser.is_active()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_active()
    }

    pub fn advertise_state(&self) -> SessionState {
        self.advertiser.state()
    }

    pub fn scan_state(&self) -> SessionState {
        self.scanner.state()
    }

    /// Summaries reported since the last scan start
    pub fn detected_devices(&self) -> Vec<DetectionSummary> {
        self.state.detections.read().clone()
    }

    /// Every proximity event recorded by this process
    pub fn proximity_events(&self) -> Vec<ProximityEvent> {
        self.state.events.read().clone()
    }

    pub fn last_error(&self) -> Option<ProximityError> {
        self.state.last_error.read().clone()
    }

    pub fn last_error_message(&self) -> Option<String> {
        self.last_error().map(|e| e.to_string())
    }

    pub fn clear_error(&self) {
        *self.state.last_error.write() = None;
    }

    pub fn snapshot(&self) -> ProximitySnapshot {
        let advertise_state = self.advertiser.state();
        let scan_state = self.scanner.state();
        ProximitySnapshot {
            identifier: self.current_identifier(),
            advertise_state,
            scan_state,
            advertising: advertise_state == SessionState::Active,
            scanning: scan_state == SessionState::Active,
            detections: self.detected_devices(),
            last_error: self.last_error_message(),
        }
    }
}
