//! In-memory Patient store for medgate.
//!
//! This crate provides an in-memory implementation of the `PatientStore` trait
//! from `medgate-storage`, using papaya lock-free HashMap for concurrent access.
//! Used by tests and by `storage.backend = "memory"` deployments.
//!
//! # Example
//!
//! ```ignore
//! use medgate_db_memory::InMemoryPatientStore;
//! use medgate_storage::PatientStore;
//!
//! let store = InMemoryPatientStore::new();
//! let total = store.count().await?;
//! ```

pub mod storage;

pub use medgate_storage::{PatientStore, StorageError, StoredPatient};
pub use storage::InMemoryPatientStore;

/// Creates a new shareable in-memory store.
pub fn create_patient_store() -> medgate_storage::DynPatientStore {
    std::sync::Arc::new(InMemoryPatientStore::new())
}
