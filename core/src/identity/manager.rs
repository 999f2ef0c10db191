// Identifier lifecycle — load, rotate, persist

use super::codec::{IdentifierCodec, Payload};
use super::store::IdentifierStore;
use super::{parse_id, Identifier};
use crate::clock::Clock;
use crate::config::ProximityConfig;
use crate::store::StoreError;
use parking_lot::Mutex;
use std::sync::Arc;

struct ManagerState {
    current: Option<Identifier>,
    codec: IdentifierCodec,
    /// Last save that exhausted its attempts, until taken
    persistence_failure: Option<StoreError>,
}

/// Owns the current identifier.
///
/// Rotation is lazy: an identifier older than the rotation interval is
/// replaced the next time it is read, or on an explicit `rotate()`. There is
/// no background scheduler.
///
/// A rotation writes to the store synchronously, so `current_identifier`,
/// `current_payload` and `rotate` may block on a backend flush.
pub struct IdentifierManager {
    store: Arc<dyn IdentifierStore>,
    clock: Arc<dyn Clock>,
    rotation_interval_ms: u64,
    persistence_attempts: u32,
    state: Mutex<ManagerState>,
}

impl IdentifierManager {
    /// Load the stored identifier, or generate one if none is usable
    pub fn new(
        store: Arc<dyn IdentifierStore>,
        clock: Arc<dyn Clock>,
        config: &ProximityConfig,
    ) -> Self {
        Self::with_codec(store, clock, config, IdentifierCodec::new())
    }

    /// Same as `new` with a caller-supplied codec (deterministic tests, simulations)
    pub fn with_codec(
        store: Arc<dyn IdentifierStore>,
        clock: Arc<dyn Clock>,
        config: &ProximityConfig,
        codec: IdentifierCodec,
    ) -> Self {
        let manager = Self {
            store,
            clock,
            rotation_interval_ms: config.rotation_interval_ms,
            persistence_attempts: config.persistence_attempts.max(1),
            state: Mutex::new(ManagerState {
                current: None,
                codec,
                persistence_failure: None,
            }),
        };
        manager.load_or_create();
        manager
    }

    /// Current identifier, rotating first if it is missing or expired
    pub fn current_identifier(&self) -> Identifier {
        let mut state = self.state.lock();
        self.ensure_current(&mut state)
    }

    /// Current identifier without the expiry check; never touches the store
    pub fn peek(&self) -> Identifier {
        let mut state = self.state.lock();
        match &state.current {
            Some(current) => current.clone(),
            None => self.ensure_current(&mut state),
        }
    }

    /// The last persistence failure, if one happened since the previous call
    pub fn take_persistence_failure(&self) -> Option<StoreError> {
        self.state.lock().persistence_failure.take()
    }

    /// Wire payload of the current identifier.
    ///
    /// Stable between rotations: repeated calls return the same bytes.
    pub fn current_payload(&self) -> Payload {
        let mut state = self.state.lock();
        self.ensure_current(&mut state);
        state.codec.encode()
    }

    /// Replace the current identifier with a freshly generated one.
    ///
    /// The new identifier is persisted before it becomes current. Callers
    /// with an active broadcast must restart it to pick up the new payload.
    pub fn rotate(&self) -> Identifier {
        let mut state = self.state.lock();
        self.rotate_locked(&mut state)
    }

    fn load_or_create(&self) {
        let mut state = self.state.lock();

        match self.store.load() {
            Ok(Some(stored)) if stored.created_at > 0 => match parse_id(&stored.id) {
                Some(value) => {
                    state.codec.adopt(value);
                    state.current = Some(Identifier::from_value(value, stored.created_at));
                    tracing::info!("🔑 Loaded identifier {}", stored.id);
                    return;
                }
                None => {
                    tracing::warn!("Stored identifier {:?} is not a valid id, rotating", stored.id);
                }
            },
            Ok(_) => {
                tracing::debug!("No stored identifier");
            }
            Err(e) => {
                tracing::warn!("Failed to load identifier ({}), rotating", e);
            }
        }

        self.rotate_locked(&mut state);
    }

    fn ensure_current(&self, state: &mut ManagerState) -> Identifier {
        let now = self.clock.now_millis();
        match &state.current {
            Some(current) if current.age_at(now) <= self.rotation_interval_ms => current.clone(),
            Some(current) => {
                tracing::debug!(
                    "Identifier {} expired after {} ms",
                    current,
                    current.age_at(now)
                );
                self.rotate_locked(state)
            }
            None => self.rotate_locked(state),
        }
    }

    fn rotate_locked(&self, state: &mut ManagerState) -> Identifier {
        state.codec.reset();
        let payload = state.codec.encode();
        let identifier = Identifier::from_value(u32::from_be_bytes(payload), self.clock.now_millis());

        if let Err(e) = self.persist(&identifier) {
            state.persistence_failure = Some(e);
        }
        state.current = Some(identifier.clone());
        tracing::info!("🔄 Rotated identifier to {}", identifier);
        identifier
    }

    fn persist(&self, identifier: &Identifier) -> Result<(), StoreError> {
        let mut last_error = None;
        for attempt in 1..=self.persistence_attempts {
            match self.store.save(identifier.id(), identifier.created_at()) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "Persisting identifier {} failed (attempt {}/{}): {}",
                        identifier,
                        attempt,
                        self.persistence_attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        tracing::error!(
            "Persistence failure: continuing with in-memory identifier {}",
            identifier
        );
        Err(last_error.unwrap_or_else(|| StoreError::WriteFailed("no attempts".to_string())))
    }
}
