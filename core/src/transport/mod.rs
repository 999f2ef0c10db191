// Transport module — BLE advertise/scan sessions

pub mod ble;

pub use ble::{
    AdvertiseFailure, AdvertiseSession, BroadcastRadio, DetectionSummary, GrantedPermissions,
    PermissionProvider, ScanFailure, ScanRadio, ScanReport, ScanSession, SessionEvent,
    SessionKind, SessionListener, SessionState, SimulatedAir, SimulatedRadio, StartOutcome,
    StopReason,
};
