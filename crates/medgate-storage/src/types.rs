//! Row types exchanged between the service layer and the stores.

use time::{Date, OffsetDateTime};

use crate::error::StorageError;

/// Store-assigned surrogate key of a local patient.
pub type PatientId = i64;

/// Indexed attributes derived from a Patient document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientColumns {
    pub active: Option<bool>,
    /// `name[0].family`, empty when absent.
    pub family: String,
    /// First token of `name[0].given`, empty when absent.
    pub given: String,
    /// One of `male`, `female`, `other`, `unknown`, or empty.
    pub gender: String,
    pub birth_date: Option<Date>,
}

/// Everything a write persists: the document and its projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub fhir_doc: Vec<u8>,
    pub columns: PatientColumns,
}

impl PatientRecord {
    /// Rejects records a store must not persist.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.fhir_doc.is_empty() {
            return Err(StorageError::invalid_resource("fhir_doc must not be empty"));
        }
        Ok(())
    }
}

/// A persisted, non-deleted patient row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPatient {
    pub id: PatientId,
    pub fhir_doc: Vec<u8>,
    pub columns: PatientColumns,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
