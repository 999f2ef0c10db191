/// BLE (Bluetooth Low Energy) proximity transport
///
/// - **radio**: capability traits implemented by platform radio code
/// - **aggregator**: per-device RSSI aggregation for one scan session
/// - **session**: state machine shape shared by both sessions
/// - **advertiser**: bounded-duration broadcast of the current identifier
/// - **scanner**: bounded-duration scan producing detection summaries
/// - **sim**: in-process simulated radio medium
///
/// Platform code (Kotlin/Swift) only performs the radio operations; all
/// session logic here is testable without BLE hardware.

pub mod advertiser;
pub mod aggregator;
pub mod radio;
pub mod scanner;
pub mod session;
pub mod sim;

// Re-export commonly used types
pub use advertiser::{AdvertiseSession, Rotation};
pub use aggregator::{Detection, DetectionAggregator, DetectionSummary};
pub use radio::{
    AdvertiseFailure, BroadcastRadio, GrantedPermissions, PermissionProvider, ScanFailure,
    ScanRadio, ScanReport, ScanStream,
};
pub use scanner::ScanSession;
pub use session::{
    SessionEvent, SessionKind, SessionListener, SessionState, StartOutcome, StopReason,
};
pub use sim::{SimulatedAir, SimulatedRadio};
