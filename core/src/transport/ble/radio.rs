/// Radio and permission capabilities consumed by the BLE sessions
///
/// Platform code (or the simulator in `sim`) implements these traits; the
/// sessions only ever see them as trait objects. Start operations are async
/// and resolve with the radio's acknowledgment, stops are fire-and-forget.

use crate::identity::Payload;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// One advertisement seen by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Transport address of the broadcaster, stable for the session
    pub device_key: String,
    /// Service data scoped to our service UUID
    pub payload: Vec<u8>,
    /// Received signal strength in dBm
    pub rssi: i16,
}

impl ScanReport {
    pub fn new(device_key: impl Into<String>, payload: impl Into<Vec<u8>>, rssi: i16) -> Self {
        Self {
            device_key: device_key.into(),
            payload: payload.into(),
            rssi,
        }
    }
}

/// Stream of scan reports for one scan session
pub type ScanStream = BoxStream<'static, ScanReport>;

/// Reasons a broadcast start can be rejected by the radio
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseFailure {
    #[error("Advertisement data too large")]
    DataTooLarge,
    #[error("Too many advertisers")]
    TooManyAdvertisers,
    #[error("Advertising already started")]
    AlreadyStarted,
    #[error("Internal advertising error")]
    InternalError,
    #[error("Advertising not supported on this device")]
    FeatureUnsupported,
    #[error("Advertising failed with code {0}")]
    Unknown(i32),
}

impl AdvertiseFailure {
    /// Map a platform failure code (1..=5) to a failure
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AdvertiseFailure::DataTooLarge,
            2 => AdvertiseFailure::TooManyAdvertisers,
            3 => AdvertiseFailure::AlreadyStarted,
            4 => AdvertiseFailure::InternalError,
            5 => AdvertiseFailure::FeatureUnsupported,
            other => AdvertiseFailure::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AdvertiseFailure::DataTooLarge => 1,
            AdvertiseFailure::TooManyAdvertisers => 2,
            AdvertiseFailure::AlreadyStarted => 3,
            AdvertiseFailure::InternalError => 4,
            AdvertiseFailure::FeatureUnsupported => 5,
            AdvertiseFailure::Unknown(code) => *code,
        }
    }

    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// The scan radio rejected a scan start
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Scan failed with code {code}")]
pub struct ScanFailure {
    pub code: i32,
}

/// Broadcast half of the radio
#[async_trait]
pub trait BroadcastRadio: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Start advertising `payload` as service data under `service`.
    /// Resolves once the radio acknowledges the request.
    async fn start_broadcast(&self, service: Uuid, payload: Payload) -> Result<(), AdvertiseFailure>;

    fn stop_broadcast(&self);
}

/// Scan half of the radio
#[async_trait]
pub trait ScanRadio: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Start scanning with a filter on `service`.
    /// The returned stream ends when the scan is stopped.
    async fn start_scan(&self, service: Uuid) -> Result<ScanStream, ScanFailure>;

    fn stop_scan(&self);
}

/// OS permission checks
#[cfg_attr(test, mockall::automock)]
pub trait PermissionProvider: Send + Sync {
    fn has_broadcast_permission(&self) -> bool;
    fn has_scan_permission(&self) -> bool;
}

/// Permission provider for hosts without a permission model
#[derive(Debug, Default, Clone, Copy)]
pub struct GrantedPermissions;

impl PermissionProvider for GrantedPermissions {
    fn has_broadcast_permission(&self) -> bool {
        true
    }

    fn has_scan_permission(&self) -> bool {
        true
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} dBm [{}]",
            self.device_key,
            self.rssi,
            hex::encode(&self.payload)
        )
    }
}
