use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use medgate_storage::{
    PatientColumns, PatientId, PatientRecord, PatientStore, StorageError, StoredPatient,
};
use papaya::{Compute, HashMap as PapayaHashMap, Operation};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
struct Row {
    patient: StoredPatient,
    deleted_at: Option<OffsetDateTime>,
}

impl Row {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// In-memory Patient store using papaya lock-free HashMap.
///
/// Ids come from an atomic counter starting at 1 and are never reused, so a
/// soft-deleted row keeps its id and re-inserting the same document gets a
/// fresh one.
#[derive(Debug)]
pub struct InMemoryPatientStore {
    rows: PapayaHashMap<PatientId, Row>,
    next_id: AtomicI64,
}

impl Default for InMemoryPatientStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self {
            rows: PapayaHashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    fn live_rows_sorted(&self) -> Vec<StoredPatient> {
        let guard = self.rows.pin();
        let mut rows: Vec<StoredPatient> = guard
            .iter()
            .filter(|(_, row)| row.is_live())
            .map(|(_, row)| row.patient.clone())
            .collect();
        rows.sort_by_key(|p| p.id);
        rows
    }
}

#[async_trait]
impl PatientStore for InMemoryPatientStore {
    async fn insert(&self, record: PatientRecord) -> Result<StoredPatient, StorageError> {
        record.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = OffsetDateTime::now_utc();
        let patient = StoredPatient {
            id,
            fhir_doc: record.fhir_doc,
            columns: record.columns,
            created_at: now,
            updated_at: now,
        };
        self.rows.pin().insert(
            id,
            Row {
                patient: patient.clone(),
                deleted_at: None,
            },
        );
        Ok(patient)
    }

    async fn get(&self, id: PatientId) -> Result<StoredPatient, StorageError> {
        let guard = self.rows.pin();
        guard
            .get(&id)
            .filter(|row| row.is_live())
            .map(|row| row.patient.clone())
            .ok_or_else(|| StorageError::not_found(id))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<StoredPatient>, StorageError> {
        Ok(self
            .live_rows_sorted()
            .into_iter()
            .skip(offset)
            .take(limit.max(1))
            .collect())
    }

    async fn update(
        &self,
        id: PatientId,
        record: PatientRecord,
    ) -> Result<StoredPatient, StorageError> {
        record.validate()?;
        let now = OffsetDateTime::now_utc();
        let guard = self.rows.pin();
        // Replace only a live row; a concurrent delete must win over a stale update.
        let outcome = guard.compute(id, |entry| match entry {
            Some((_, row)) if row.is_live() => Operation::Insert(Row {
                patient: StoredPatient {
                    id,
                    fhir_doc: record.fhir_doc.clone(),
                    columns: record.columns.clone(),
                    created_at: row.patient.created_at,
                    updated_at: now,
                },
                deleted_at: None,
            }),
            _ => Operation::Abort(()),
        });
        match outcome {
            Compute::Updated { new: (_, row), .. } => Ok(row.patient.clone()),
            _ => Err(StorageError::not_found(id)),
        }
    }

    async fn delete(&self, id: PatientId) -> Result<(), StorageError> {
        let now = OffsetDateTime::now_utc();
        let guard = self.rows.pin();
        guard.compute(id, |entry| match entry {
            Some((_, row)) if row.is_live() => Operation::Insert(Row {
                patient: row.patient.clone(),
                deleted_at: Some(now),
            }),
            _ => Operation::Abort(()),
        });
        Ok(())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let guard = self.rows.pin();
        Ok(guard.iter().filter(|(_, row)| row.is_live()).count() as u64)
    }

    async fn exists_matching(&self, columns: &PatientColumns) -> Result<bool, StorageError> {
        let guard = self.rows.pin();
        Ok(guard.iter().any(|(_, row)| {
            let c = &row.patient.columns;
            row.is_live()
                && c.family == columns.family
                && c.given == columns.given
                && c.gender == columns.gender
                && c.birth_date == columns.birth_date
        }))
    }
}
