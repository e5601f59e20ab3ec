use std::collections::HashMap;
use std::time::Duration;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use medgate_api::ApiError;
use medgate_core::{Patient, PATIENT_RESOURCE_TYPE};
use medgate_storage::PatientId;
use serde::Serialize;
use serde_json::{Value, json};

use crate::context::RequestContext;
use crate::gateway::SearchParams;
use crate::server::AppState;
use crate::services::{PatientPatch, to_fhir};

pub const API_PREFIX: &str = "/api/v1";

const DEFAULT_LIMIT: i64 = 10;
const DEFAULT_DELAYED_TIMEOUT_SECS: u64 = 10;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "FHIR Patient API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.patients.store().count().await {
        Ok(_) => {
            let stats = state.cache_backend.stats();
            let redis_available = state.cache_backend.is_redis_available().await;
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ready",
                    "cache": {
                        "mode": stats.mode,
                        "l1_entries": stats.l1_entries,
                        "redis_available": redis_available,
                    },
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "unavailable", "message": e.to_string()})),
            )
        }
    }
}

pub async fn metadata(State(state): State<AppState>) -> impl IntoResponse {
    let interactions: Vec<Value> = ["read", "create", "update", "patch", "delete", "search-type"]
        .iter()
        .map(|code| json!({"code": code}))
        .collect();
    Json(json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "kind": "instance",
        "fhirVersion": "4.0.1",
        "format": ["application/fhir+json", "application/json"],
        "software": {"name": "medgate", "version": env!("CARGO_PKG_VERSION")},
        "implementation": {
            "description": format!(
                "Patient gateway for {} (FHIR {})",
                state.upstream_base_url, state.upstream_fhir_version
            )
        },
        "rest": [{
            "mode": "server",
            "resource": [{
                "type": PATIENT_RESOURCE_TYPE,
                "interaction": interactions
            }]
        }]
    }))
}

pub async fn fallback() -> ApiError {
    ApiError::not_found("route not found")
}

// ---- Local patients ----

/// Digits beyond the id range are well formed but can never match a row.
fn parse_local_id(raw: &str) -> ApiResult<PatientId> {
    match raw.parse::<PatientId>() {
        Ok(id) if id >= 0 => Ok(id),
        Err(_) if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => Err(
            ApiError::not_found(format!("Patient not found: {raw}")),
        ),
        _ => Err(ApiError::invalid_id(raw)),
    }
}

fn parse_patient(body: &Bytes) -> ApiResult<Patient> {
    Ok(Patient::from_slice(body)?)
}

/// `limit` falls back to 10 when missing, unparseable or not positive.
/// `offset` falls back to 0 when missing, unparseable or negative.
fn page_params(query: &HashMap<String, String>) -> (usize, usize) {
    let limit = query
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_LIMIT);
    let offset = query
        .get("offset")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0);
    (
        usize::try_from(limit).unwrap_or(usize::MAX),
        usize::try_from(offset).unwrap_or(usize::MAX),
    )
}

#[derive(Serialize)]
struct PatientListResponse {
    patients: Vec<Patient>,
    total: u64,
    limit: usize,
    offset: usize,
}

pub async fn list_patients(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let (limit, offset) = page_params(&query);
    let page = state.patients.list(&ctx, limit, offset).await?;
    Ok(Json(PatientListResponse {
        patients: page.patients,
        total: page.total,
        limit,
        offset,
    }))
}

pub async fn create_patient(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let patient = parse_patient(&body)?;
    let row = state.patients.create(&ctx, &patient).await?;
    let location = format!("{API_PREFIX}/patients/{}", row.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(to_fhir(&row)?),
    ))
}

pub async fn get_patient(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Patient>> {
    let id = parse_local_id(&id)?;
    let row = state.patients.get(&ctx, id).await?;
    Ok(Json(to_fhir(&row)?))
}

pub async fn update_patient(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Patient>> {
    let id = parse_local_id(&id)?;
    let patient = parse_patient(&body)?;
    let row = state.patients.update(&ctx, id, &patient).await?;
    Ok(Json(to_fhir(&row)?))
}

pub async fn patch_patient(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Patient>> {
    let id = parse_local_id(&id)?;
    let updates: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;
    let patch = PatientPatch::from_value(&updates)?;
    let row = state.patients.patch(&ctx, id, &patch).await?;
    Ok(Json(to_fhir(&row)?))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_local_id(&id)?;
    state.patients.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- External patients ----

fn external_id(raw: &str) -> ApiResult<&str> {
    if raw.trim().is_empty() {
        return Err(ApiError::bad_request("external patient id must not be empty"));
    }
    Ok(raw)
}

/// Keeps the first value of every repeated key.
fn search_params(pairs: Vec<(String, String)>) -> SearchParams {
    let mut params = SearchParams::new();
    for (key, value) in pairs {
        params.entry(key).or_insert(value);
    }
    params
}

fn delayed_timeout(query: &HashMap<String, String>) -> ApiResult<Duration> {
    let secs = match query.get("timeout") {
        None => DEFAULT_DELAYED_TIMEOUT_SECS,
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| {
                ApiError::bad_request(format!(
                    "timeout must be a positive integer number of seconds, got '{raw}'"
                ))
            })?,
    };
    Ok(Duration::from_secs(secs))
}

pub async fn search_external(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<impl IntoResponse> {
    let bundle = state.external.search(&ctx, &search_params(pairs)).await?;
    Ok(Json(bundle))
}

pub async fn create_external(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let patient = parse_patient(&body)?;
    let created = state.external.create(&ctx, &patient).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_external(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Patient>> {
    let patient = state.external.get(&ctx, external_id(&id)?).await?;
    Ok(Json(patient))
}

pub async fn get_external_cached(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Patient>> {
    let patient = state.external.get_cached(&ctx, external_id(&id)?).await?;
    Ok(Json(patient))
}

pub async fn get_external_delayed(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Json<Patient>> {
    let id = external_id(&id)?;
    let timeout = delayed_timeout(&query)?;
    let patient = state.external.get_delayed(&ctx, id, timeout).await?;
    Ok(Json(patient))
}
