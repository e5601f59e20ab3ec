//! Remote FHIR server access.
//!
//! The [`PatientGateway`] trait is the seam between the external-patient
//! service and the wire. [`HttpPatientGateway`] is the only production
//! implementation; tests substitute their own.

mod client;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use medgate_core::{Bundle, Patient, Result};

use crate::context::RequestContext;

pub use client::{FHIR_JSON, HttpPatientGateway};

/// Search parameters forwarded verbatim to the remote server.
pub type SearchParams = BTreeMap<String, String>;

/// Operations the gateway needs from a remote FHIR server.
///
/// Every call is bounded by `ctx.deadline`.
#[async_trait]
pub trait PatientGateway: Send + Sync {
    /// `GET {base}/Patient/{id}`. Succeeds only on 200.
    async fn get_patient(&self, ctx: &RequestContext, id: &str) -> Result<Patient>;

    /// `GET {base}/Patient?{params}`. Succeeds only on 200.
    async fn search_patients(&self, ctx: &RequestContext, params: &SearchParams)
    -> Result<Bundle>;

    /// `POST {base}/Patient`. Succeeds on 200 or 201.
    async fn create_patient(&self, ctx: &RequestContext, patient: &Patient) -> Result<Patient>;
}

pub type DynPatientGateway = Arc<dyn PatientGateway>;
