//! Storage trait for local Patient persistence.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{PatientColumns, PatientId, PatientRecord, StoredPatient};

/// The contract every Patient storage backend implements.
///
/// Soft-deleted rows are invisible to every method. Implementations must be
/// thread-safe (`Send + Sync`); callers share one instance across requests.
///
/// # Example
///
/// ```ignore
/// use medgate_storage::{PatientStore, StorageError, StoredPatient};
///
/// async fn fetch(store: &dyn PatientStore, id: i64) -> Result<StoredPatient, StorageError> {
///     store.get(id).await
/// }
/// ```
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Persists a new row, assigning `id`, `created_at` and `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidResource` if `fhir_doc` is empty.
    async fn insert(&self, record: PatientRecord) -> Result<StoredPatient, StorageError>;

    /// Reads a row by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the row is absent or soft-deleted.
    async fn get(&self, id: PatientId) -> Result<StoredPatient, StorageError>;

    /// Returns at most `limit` rows ordered by `id` ascending, skipping `offset`.
    ///
    /// Callers clamp `limit` to at least 1.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<StoredPatient>, StorageError>;

    /// Replaces the document and columns of an existing row.
    ///
    /// `created_at` is preserved and `updated_at` refreshed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the row no longer exists.
    /// Returns `StorageError::InvalidResource` if `fhir_doc` is empty.
    async fn update(
        &self,
        id: PatientId,
        record: PatientRecord,
    ) -> Result<StoredPatient, StorageError>;

    /// Soft-deletes a row. Deleting an absent or already deleted id succeeds.
    async fn delete(&self, id: PatientId) -> Result<(), StorageError>;

    /// Number of non-deleted rows.
    async fn count(&self) -> Result<u64, StorageError>;

    /// Whether a non-deleted row has the same family, given, gender and birth date.
    async fn exists_matching(&self, columns: &PatientColumns) -> Result<bool, StorageError>;
}
