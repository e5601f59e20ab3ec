//! SQL for the `patients` table.
//!
//! `fhir_data` is JSONB: documents are bound as text and cast with `::jsonb`,
//! and read back with `::text`, so bytes leaving the store are Postgres's
//! canonical rendering of the document.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use time::{Date, Month, OffsetDateTime};

use medgate_storage::{PatientColumns, PatientId, PatientRecord, StorageError, StoredPatient};

use crate::error::query_error;

const RETURNING: &str = "id, fhir_data::text, active, family, given, gender, birth_date, created_at, updated_at";

type PatientRow = (
    i64,
    String,
    Option<bool>,
    String,
    String,
    String,
    Option<NaiveDate>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Converts chrono DateTime to time OffsetDateTime.
fn chrono_to_time(dt: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(dt.timestamp()).unwrap_or(OffsetDateTime::UNIX_EPOCH)
        + time::Duration::nanoseconds(i64::from(dt.timestamp_subsec_nanos()))
}

fn naive_to_date(d: NaiveDate) -> Option<Date> {
    let month = Month::try_from(u8::try_from(d.month()).ok()?).ok()?;
    Date::from_calendar_date(d.year(), month, u8::try_from(d.day()).ok()?).ok()
}

fn date_to_naive(d: Date) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(d.year(), u32::from(u8::from(d.month())), u32::from(d.day()))
}

fn into_stored(row: PatientRow) -> StoredPatient {
    let (id, doc, active, family, given, gender, birth_date, created_at, updated_at) = row;
    StoredPatient {
        id,
        fhir_doc: doc.into_bytes(),
        columns: PatientColumns {
            active,
            family,
            given,
            gender,
            birth_date: birth_date.and_then(naive_to_date),
        },
        created_at: chrono_to_time(created_at),
        updated_at: chrono_to_time(updated_at),
    }
}

fn document_text(record: &PatientRecord) -> Result<&str, StorageError> {
    record.validate()?;
    std::str::from_utf8(&record.fhir_doc)
        .map_err(|e| StorageError::invalid_resource(format!("document is not UTF-8: {e}")))
}

pub async fn insert(pool: &PgPool, record: &PatientRecord) -> Result<StoredPatient, StorageError> {
    let doc = document_text(record)?;
    let c = &record.columns;
    let sql = format!(
        "INSERT INTO patients (fhir_data, active, family, given, gender, birth_date)
         VALUES ($1::jsonb, $2, $3, $4, $5, $6)
         RETURNING {RETURNING}"
    );

    let row: PatientRow = query_as(&sql)
        .bind(doc)
        .bind(c.active)
        .bind(&c.family)
        .bind(&c.given)
        .bind(&c.gender)
        .bind(c.birth_date.and_then(date_to_naive))
        .fetch_one(pool)
        .await
        .map_err(|e| query_error("Failed to insert patient", e))?;

    Ok(into_stored(row))
}

pub async fn get(pool: &PgPool, id: PatientId) -> Result<StoredPatient, StorageError> {
    let sql = format!("SELECT {RETURNING} FROM patients WHERE id = $1 AND deleted_at IS NULL");

    let row: Option<PatientRow> = query_as(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| query_error("Failed to read patient", e))?;

    row.map(into_stored)
        .ok_or_else(|| StorageError::not_found(id))
}

pub async fn list(
    pool: &PgPool,
    limit: usize,
    offset: usize,
) -> Result<Vec<StoredPatient>, StorageError> {
    let sql = format!(
        "SELECT {RETURNING} FROM patients
         WHERE deleted_at IS NULL
         ORDER BY id
         LIMIT $1 OFFSET $2"
    );

    let rows: Vec<PatientRow> = query_as(&sql)
        .bind(i64::try_from(limit.max(1)).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(pool)
        .await
        .map_err(|e| query_error("Failed to list patients", e))?;

    Ok(rows.into_iter().map(into_stored).collect())
}

pub async fn update(
    pool: &PgPool,
    id: PatientId,
    record: &PatientRecord,
) -> Result<StoredPatient, StorageError> {
    let doc = document_text(record)?;
    let c = &record.columns;
    let sql = format!(
        "UPDATE patients
         SET fhir_data = $2::jsonb, active = $3, family = $4, given = $5,
             gender = $6, birth_date = $7, updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL
         RETURNING {RETURNING}"
    );

    let row: Option<PatientRow> = query_as(&sql)
        .bind(id)
        .bind(doc)
        .bind(c.active)
        .bind(&c.family)
        .bind(&c.given)
        .bind(&c.gender)
        .bind(c.birth_date.and_then(date_to_naive))
        .fetch_optional(pool)
        .await
        .map_err(|e| query_error("Failed to update patient", e))?;

    row.map(into_stored)
        .ok_or_else(|| StorageError::not_found(id))
}

pub async fn soft_delete(pool: &PgPool, id: PatientId) -> Result<(), StorageError> {
    query("UPDATE patients SET deleted_at = now() WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| query_error("Failed to delete patient", e))?;
    Ok(())
}

pub async fn count(pool: &PgPool) -> Result<u64, StorageError> {
    let total: i64 = query_scalar("SELECT COUNT(*) FROM patients WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await
        .map_err(|e| query_error("Failed to count patients", e))?;
    Ok(u64::try_from(total).unwrap_or(0))
}

pub async fn exists_matching(
    pool: &PgPool,
    columns: &PatientColumns,
) -> Result<bool, StorageError> {
    query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM patients
             WHERE deleted_at IS NULL
               AND family = $1 AND given = $2 AND gender = $3
               AND birth_date IS NOT DISTINCT FROM $4
         )",
    )
    .bind(&columns.family)
    .bind(&columns.given)
    .bind(&columns.gender)
    .bind(columns.birth_date.and_then(date_to_naive))
    .fetch_one(pool)
    .await
    .map_err(|e| query_error("Failed to look up patient", e))
}
