//! # medgate-storage
//!
//! Storage abstraction for local Patient persistence.
//!
//! This crate defines the [`PatientStore`] trait and the row types every
//! backend exchanges with the service layer. It contains no implementation;
//! see `medgate-db-memory` and `medgate-db-postgres`.
//!
//! A stored row carries the canonical FHIR document plus a small set of
//! indexed columns ([`PatientColumns`]). The columns are always derived by the
//! service from the document; a store persists what it is given and never
//! recomputes them.
//!
//! ## Example
//!
//! ```ignore
//! use medgate_storage::{PatientStore, StorageResult, StoredPatient};
//!
//! async fn first_page(store: &dyn PatientStore) -> StorageResult<Vec<StoredPatient>> {
//!     store.list(10, 0).await
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::PatientStore;
pub use types::{PatientColumns, PatientId, PatientRecord, StoredPatient};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shareable store trait object.
pub type DynPatientStore = std::sync::Arc<dyn PatientStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use medgate_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::PatientStore;
    pub use crate::types::{PatientColumns, PatientId, PatientRecord, StoredPatient};
    pub use crate::{DynPatientStore, StorageResult};
}
