//! Local Patient CRUD over a [`PatientStore`].
//!
//! The stored FHIR document is the source of truth. The indexed columns are
//! recomputed from it by [`project`] on every write and never read back.

use medgate_core::{CoreError, Patient, Result, parse_date, strip_nul};
use medgate_storage::{DynPatientStore, PatientColumns, PatientId, PatientRecord, StoredPatient};
use tracing::{debug, info, instrument, warn};

use super::patch::PatientPatch;
use crate::context::RequestContext;

/// Derives the record a write persists from a FHIR document.
pub fn project(patient: &Patient) -> Result<PatientRecord> {
    let mut doc = serde_json::to_value(patient)
        .map_err(|e| CoreError::internal(format!("Failed to serialize Patient: {e}")))?;
    strip_nul(&mut doc);
    let fhir_doc = serde_json::to_vec(&doc)
        .map_err(|e| CoreError::internal(format!("Failed to serialize Patient: {e}")))?;

    let name = patient.primary_name();
    let columns = PatientColumns {
        active: patient.active,
        family: name
            .and_then(|n| n.family.as_deref())
            .map(without_nul)
            .unwrap_or_default(),
        given: name
            .and_then(|n| n.first_given())
            .map(without_nul)
            .unwrap_or_default(),
        gender: patient
            .gender
            .map(|g| g.as_str().to_owned())
            .unwrap_or_default(),
        birth_date: patient
            .birth_date
            .as_deref()
            .and_then(|d| parse_date(d).ok()),
    };

    Ok(PatientRecord { fhir_doc, columns })
}

fn without_nul(s: &str) -> String {
    s.replace('\0', "")
}

/// Decodes the document of a stored row. The columns are not consulted.
pub fn to_fhir(row: &StoredPatient) -> Result<Patient> {
    serde_json::from_slice(&row.fhir_doc).map_err(|e| {
        CoreError::storage(format!("Stored document for patient {} is corrupt: {e}", row.id))
    })
}

/// One page of local patients plus the live row count.
///
/// `total` comes from a separate query, so concurrent writes can make it
/// disagree with the page.
#[derive(Debug, Clone)]
pub struct PatientPage {
    pub patients: Vec<Patient>,
    pub total: u64,
}

#[derive(Clone)]
pub struct PatientService {
    store: DynPatientStore,
}

impl PatientService {
    pub fn new(store: DynPatientStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DynPatientStore {
        &self.store
    }

    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn create(&self, ctx: &RequestContext, patient: &Patient) -> Result<StoredPatient> {
        patient.ensure_resource_type()?;
        let record = project(patient)?;
        let row = self.store.insert(record).await?;
        info!(patient_id = row.id, "Patient created");
        Ok(row)
    }

    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn get(&self, ctx: &RequestContext, id: PatientId) -> Result<StoredPatient> {
        Ok(self.store.get(id).await?)
    }

    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn list(
        &self,
        ctx: &RequestContext,
        limit: usize,
        offset: usize,
    ) -> Result<PatientPage> {
        let rows = self.store.list(limit.max(1), offset).await?;
        let total = self.store.count().await?;

        let patients = rows
            .iter()
            .filter_map(|row| match to_fhir(row) {
                Ok(patient) => Some(patient),
                Err(e) => {
                    warn!(patient_id = row.id, error = %e, "Skipping undecodable patient row");
                    None
                }
            })
            .collect();

        Ok(PatientPage { patients, total })
    }

    /// Replaces the whole document. Elements absent from `patient` are gone
    /// afterwards.
    #[instrument(skip(self, ctx, patient), fields(request_id = %ctx.request_id))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: PatientId,
        patient: &Patient,
    ) -> Result<StoredPatient> {
        patient.ensure_resource_type()?;
        self.store.get(id).await?;
        let record = project(patient)?;
        let row = self.store.update(id, record).await?;
        info!(patient_id = id, "Patient replaced");
        Ok(row)
    }

    /// Read-modify-write of the recognised patch fields. Concurrent writers to
    /// the same id are last-write-wins.
    #[instrument(skip(self, ctx, patch), fields(request_id = %ctx.request_id))]
    pub async fn patch(
        &self,
        ctx: &RequestContext,
        id: PatientId,
        patch: &PatientPatch,
    ) -> Result<StoredPatient> {
        let existing = self.store.get(id).await?;
        let mut patient = to_fhir(&existing)?;
        if patch.is_empty() {
            debug!(patient_id = id, "Patch has no recognised fields");
        }
        patch.apply(&mut patient);
        let record = project(&patient)?;
        let row = self.store.update(id, record).await?;
        info!(patient_id = id, "Patient patched");
        Ok(row)
    }

    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn delete(&self, ctx: &RequestContext, id: PatientId) -> Result<()> {
        self.store.delete(id).await?;
        info!(patient_id = id, "Patient deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use assert_json_diff::assert_json_eq;
    use medgate_core::{AdministrativeGender, HumanName};
    use medgate_db_memory::InMemoryPatientStore;
    use serde_json::json;
    use time::macros::date;

    fn service() -> PatientService {
        PatientService::new(Arc::new(InMemoryPatientStore::new()))
    }

    fn ctx() -> RequestContext {
        RequestContext::background(Duration::from_secs(5))
    }

    fn john() -> Patient {
        serde_json::from_value(json!({
            "resourceType": "Patient",
            "active": true,
            "name": [{"family": "Doe", "given": ["John", "Q"]}],
            "gender": "male",
            "birthDate": "1980-01-01",
            "telecom": [{"system": "phone", "value": "1234567890"}]
        }))
        .unwrap()
    }

    #[test]
    fn project_derives_columns() {
        let record = project(&john()).unwrap();
        assert_eq!(
            record.columns,
            PatientColumns {
                active: Some(true),
                family: "Doe".into(),
                given: "John".into(),
                gender: "male".into(),
                birth_date: Some(date!(1980 - 01 - 01)),
            }
        );
        let doc: serde_json::Value = serde_json::from_slice(&record.fhir_doc).unwrap();
        assert_eq!(doc["telecom"][0]["value"], "1234567890");
    }

    #[test]
    fn project_tolerates_missing_and_bad_fields() {
        let patient = Patient {
            birth_date: Some("1980".into()),
            ..Default::default()
        };
        let record = project(&patient).unwrap();
        assert_eq!(record.columns, PatientColumns::default());
    }

    #[test]
    fn project_strips_nul_characters() {
        let patient = Patient {
            name: Some(vec![HumanName::new("Do\u{0}e", "Jo\u{0}hn")]),
            ..Default::default()
        };
        let record = project(&patient).unwrap();
        assert!(!record.fhir_doc.contains(&0));
        assert!(!String::from_utf8(record.fhir_doc).unwrap().contains("\\u0000"));
        assert_eq!(record.columns.family, "Doe");
        assert_eq!(record.columns.given, "John");
    }

    #[tokio::test]
    async fn create_then_get_returns_same_document() {
        let svc = service();
        let row = svc.create(&ctx(), &john()).await.unwrap();
        assert_eq!(row.id, 1);

        let fetched = svc.get(&ctx(), row.id).await.unwrap();
        assert_json_eq!(
            serde_json::to_value(to_fhir(&fetched).unwrap()).unwrap(),
            serde_json::to_value(john()).unwrap()
        );
    }

    #[tokio::test]
    async fn create_rejects_other_resource_types() {
        let svc = service();
        let obs = Patient {
            resource_type: "Observation".into(),
            ..Default::default()
        };
        let err = svc.create(&ctx(), &obs).await.unwrap_err();
        assert!(matches!(err, CoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn patch_updates_document_and_columns() {
        let svc = service();
        let row = svc.create(&ctx(), &john()).await.unwrap();

        let patch = PatientPatch {
            active: Some(false),
            given: Some("Jack".into()),
            gender: Some(AdministrativeGender::Other),
            ..Default::default()
        };
        let patched = svc.patch(&ctx(), row.id, &patch).await.unwrap();
        assert_eq!(patched.columns.active, Some(false));
        assert_eq!(patched.columns.given, "Jack");
        assert_eq!(patched.columns.gender, "other");
        assert_eq!(patched.created_at, row.created_at);

        let patient = to_fhir(&patched).unwrap();
        assert_eq!(patient.primary_name().unwrap().given, Some(vec!["Jack".to_string()]));
        assert!(patient.extra.contains_key("telecom"));
    }

    #[tokio::test]
    async fn empty_patch_keeps_document() {
        let svc = service();
        let row = svc.create(&ctx(), &john()).await.unwrap();
        let patched = svc
            .patch(&ctx(), row.id, &PatientPatch::default())
            .await
            .unwrap();
        assert_eq!(to_fhir(&patched).unwrap(), to_fhir(&row).unwrap());
        assert_eq!(patched.columns, row.columns);
    }

    #[tokio::test]
    async fn update_replaces_whole_document() {
        let svc = service();
        let row = svc.create(&ctx(), &john()).await.unwrap();

        let replacement = Patient {
            name: Some(vec![HumanName::new("Roe", "Richard")]),
            ..Default::default()
        };
        let updated = svc.update(&ctx(), row.id, &replacement).await.unwrap();
        let patient = to_fhir(&updated).unwrap();
        assert_eq!(patient.gender, None);
        assert!(!patient.extra.contains_key("telecom"));
        assert_eq!(updated.columns.family, "Roe");
        assert_eq!(updated.columns.gender, "");
    }

    #[tokio::test]
    async fn deleted_patients_disappear() {
        let svc = service();
        let first = svc.create(&ctx(), &john()).await.unwrap();
        svc.create(&ctx(), &john()).await.unwrap();

        svc.delete(&ctx(), first.id).await.unwrap();
        svc.delete(&ctx(), first.id).await.unwrap();

        assert!(svc.get(&ctx(), first.id).await.unwrap_err().is_not_found());
        let page = svc.list(&ctx(), 10, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.patients.len(), 1);

        let err = svc
            .update(&ctx(), first.id, &john())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_pages_in_id_order() {
        let svc = service();
        for family in ["A", "B", "C"] {
            let patient = Patient {
                name: Some(vec![HumanName::new(family, "X")]),
                ..Default::default()
            };
            svc.create(&ctx(), &patient).await.unwrap();
        }
        let page = svc.list(&ctx(), 2, 1).await.unwrap();
        assert_eq!(page.total, 3);
        let families: Vec<_> = page
            .patients
            .iter()
            .filter_map(|p| p.primary_name().and_then(|n| n.family.clone()))
            .collect();
        assert_eq!(families, vec!["B", "C"]);
    }
}
