// Store module — key-value persistence backends

pub mod backend;

pub use backend::{MemoryStorage, SledStorage, StorageBackend, StoreError};
