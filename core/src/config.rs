//! Protocol and session configuration
//!
//! Defaults reproduce the deployed protocol: 30 second advertise/scan
//! sessions, 15 minute identifier rotation and a 10 reading RSSI window.
//! The service UUID is compatibility-critical and should only be changed
//! together with every peer.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Service UUID used to scope the broadcast service-data field and the scan filter
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Default advertise/scan session length (30 seconds)
pub const DEFAULT_SESSION_DURATION_MS: u64 = 30_000;

/// Default identifier rotation interval (15 minutes)
pub const DEFAULT_ROTATION_INTERVAL_MS: u64 = 15 * 60 * 1000;

/// Pause between stopping and restarting a broadcast on rotation
pub const DEFAULT_RESTART_GRACE_MS: u64 = 100;

/// Number of most recent RSSI readings kept per device
pub const DEFAULT_MAX_SIGNAL_READINGS: usize = 10;

/// Attempts made to persist a freshly rotated identifier
pub const DEFAULT_PERSISTENCE_ATTEMPTS: u32 = 3;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors that can occur during configuration validation
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    #[error("Invalid session duration: must be > 0 ms")]
    InvalidSessionDuration,

    #[error("Invalid rotation interval: must be > 0 ms")]
    InvalidRotationInterval,

    #[error("Invalid signal window: must keep at least one reading")]
    InvalidSignalWindow,

    #[error("Invalid persistence attempts: must be >= 1")]
    InvalidPersistenceAttempts,
}

// ============================================================================
// PROXIMITY CONFIG
// ============================================================================

/// Tunables for identifier rotation and the advertise/scan sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProximityConfig {
    /// Service UUID for broadcast payloads and scan filtering
    pub service_uuid: Uuid,

    /// Length of one advertise or scan session
    pub session_duration_ms: u64,

    /// Age after which the current identifier is replaced on next read
    pub rotation_interval_ms: u64,

    /// Delay before re-advertising after a rotation
    pub restart_grace_ms: u64,

    /// RSSI readings retained per device (oldest evicted first)
    pub max_signal_readings: usize,

    /// Store writes attempted per rotation before giving up
    pub persistence_attempts: u32,
}

impl ProximityConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_duration_ms == 0 {
            return Err(ConfigError::InvalidSessionDuration);
        }
        if self.rotation_interval_ms == 0 {
            return Err(ConfigError::InvalidRotationInterval);
        }
        if self.max_signal_readings == 0 {
            return Err(ConfigError::InvalidSignalWindow);
        }
        if self.persistence_attempts == 0 {
            return Err(ConfigError::InvalidPersistenceAttempts);
        }
        Ok(())
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_millis(self.session_duration_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }

    /// Override the session length
    pub fn with_session_duration_ms(mut self, millis: u64) -> Self {
        self.session_duration_ms = millis;
        self
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            session_duration_ms: DEFAULT_SESSION_DURATION_MS,
            rotation_interval_ms: DEFAULT_ROTATION_INTERVAL_MS,
            restart_grace_ms: DEFAULT_RESTART_GRACE_MS,
            max_signal_readings: DEFAULT_MAX_SIGNAL_READINGS,
            persistence_attempts: DEFAULT_PERSISTENCE_ATTEMPTS,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
