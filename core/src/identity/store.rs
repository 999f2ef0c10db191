// Identifier storage over a key-value backend

use crate::clock::Millis;
use crate::store::backend::{MemoryStorage, StorageBackend, StoreError};
use std::sync::Arc;

const CURRENT_ID_KEY: &[u8] = b"current_identifier_id";
const CURRENT_TIMESTAMP_KEY: &[u8] = b"current_identifier_created_at";

/// The persisted `(id, created_at)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredIdentifier {
    pub id: String,
    pub created_at: Millis,
}

/// Persistent store capability for the current identifier
#[cfg_attr(test, mockall::automock)]
pub trait IdentifierStore: Send + Sync {
    /// Load the stored pair, if both halves are present
    fn load(&self) -> Result<Option<StoredIdentifier>, StoreError>;

    /// Replace the stored pair
    fn save(&self, id: &str, created_at: Millis) -> Result<(), StoreError>;
}

/// Identifier store backed by any `StorageBackend`
pub struct BackendIdentifierStore {
    backend: Arc<dyn StorageBackend>,
}

impl BackendIdentifierStore {
    /// Store that lives only as long as the process
    pub fn memory() -> Self {
        Self::persistent(Arc::new(MemoryStorage::new()))
    }

    pub fn persistent(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Remove the stored identifier
    pub fn clear(&self) -> Result<(), StoreError> {
        self.backend.remove(CURRENT_ID_KEY)?;
        self.backend.remove(CURRENT_TIMESTAMP_KEY)?;
        self.backend.flush()
    }
}

impl IdentifierStore for BackendIdentifierStore {
    fn load(&self) -> Result<Option<StoredIdentifier>, StoreError> {
        let id = match self.backend.get(CURRENT_ID_KEY)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| StoreError::Corrupt("current_identifier_id".to_string()))?,
            None => return Ok(None),
        };

        let created_at = match self.backend.get(CURRENT_TIMESTAMP_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Corrupt("current_identifier_created_at".to_string())
                })?;
                u64::from_be_bytes(raw)
            }
            None => return Ok(None),
        };

        Ok(Some(StoredIdentifier { id, created_at }))
    }

    fn save(&self, id: &str, created_at: Millis) -> Result<(), StoreError> {
        self.backend.put(CURRENT_ID_KEY, id.as_bytes())?;
        self.backend
            .put(CURRENT_TIMESTAMP_KEY, &created_at.to_be_bytes())?;
        self.backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::SledStorage;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = BackendIdentifierStore::memory();
        assert!(store.load().unwrap().is_none());

        store.save("ble-1234", 42).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.id, "ble-1234");
        assert_eq!(loaded.created_at, 42);
    }

    #[test]
    fn test_missing_timestamp_loads_none() {
        let backend = Arc::new(MemoryStorage::new());
        backend.put(CURRENT_ID_KEY, b"ble-1").unwrap();

        let store = BackendIdentifierStore::persistent(backend);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let backend = Arc::new(MemoryStorage::new());
        backend.put(CURRENT_ID_KEY, b"ble-1").unwrap();
        backend.put(CURRENT_TIMESTAMP_KEY, b"abc").unwrap();

        let store = BackendIdentifierStore::persistent(backend);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_store_clear() {
        let store = BackendIdentifierStore::memory();
        store.save("ble-9", 1).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_store_persistence_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identifier").to_str().unwrap().to_string();

        {
            let backend = Arc::new(SledStorage::new(&path).unwrap());
            let store = BackendIdentifierStore::persistent(backend);
            store.save("ble-beef", 1_700_000_000_000).unwrap();
        }

        {
            let backend = Arc::new(SledStorage::new(&path).unwrap());
            let store = BackendIdentifierStore::persistent(backend);
            let loaded = store.load().unwrap().unwrap();
            assert_eq!(loaded.id, "ble-beef");
            assert_eq!(loaded.created_at, 1_700_000_000_000);
        }
    }
}
