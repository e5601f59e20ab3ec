use std::time::Duration;

use async_trait::async_trait;
use medgate_core::{Bundle, CoreError, Patient, Result};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{PatientGateway, SearchParams};
use crate::context::RequestContext;

/// Media type for FHIR JSON payloads.
pub const FHIR_JSON: &str = "application/fhir+json";

/// reqwest-backed [`PatientGateway`].
///
/// Each call gets a timeout of `min(default_timeout, ctx.remaining())`. When
/// the request deadline is the tighter of the two an elapsed timer is reported
/// as [`CoreError::Timeout`], otherwise as [`CoreError::UpstreamUnavailable`].
#[derive(Debug, Clone)]
pub struct HttpPatientGateway {
    client: Client,
    base_url: String,
    default_timeout: Duration,
}

/// Per-call timer derived from the request deadline.
#[derive(Debug, Clone, Copy)]
struct CallBudget {
    timeout: Duration,
    deadline_bound: bool,
}

impl HttpPatientGateway {
    pub fn new(base_url: impl Into<String>, default_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("medgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url, default_timeout))
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        default_timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            default_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn patient_url(&self, id: &str) -> String {
        format!("{}/Patient/{}", self.base_url, urlencoding::encode(id))
    }

    fn search_url(&self, params: &SearchParams) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/Patient", self.base_url))
            .map_err(|e| CoreError::internal(format!("Invalid upstream base URL: {e}")))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    fn budget(&self, ctx: &RequestContext) -> Result<CallBudget> {
        let remaining = ctx.remaining();
        if remaining.is_zero() {
            return Err(CoreError::timeout(
                "request deadline elapsed before contacting upstream",
            ));
        }
        Ok(CallBudget {
            timeout: remaining.min(self.default_timeout),
            deadline_bound: remaining < self.default_timeout,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        budget: CallBudget,
        accepted: &[StatusCode],
    ) -> Result<T> {
        let response = request
            .header(ACCEPT, FHIR_JSON)
            .timeout(budget.timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, budget))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, budget))?;
        debug!(status = %status, bytes = body.len(), "Upstream response received");

        if !accepted.contains(&status) {
            warn!(status = %status, "Upstream returned an error status");
            return Err(CoreError::upstream(
                status.as_u16(),
                &String::from_utf8_lossy(&body),
            ));
        }

        serde_json::from_slice(&body).map_err(|e| {
            CoreError::malformed_response(format!("Failed to decode upstream response: {e}"))
        })
    }
}

fn transport_error(err: reqwest::Error, budget: CallBudget) -> CoreError {
    if err.is_timeout() {
        if budget.deadline_bound {
            CoreError::timeout(format!(
                "request deadline elapsed after {}ms waiting for upstream",
                budget.timeout.as_millis()
            ))
        } else {
            CoreError::upstream_unavailable(format!(
                "upstream request timed out after {}ms",
                budget.timeout.as_millis()
            ))
        }
    } else if err.is_connect() {
        CoreError::upstream_unavailable(format!("Failed to connect to upstream: {err}"))
    } else {
        CoreError::upstream_unavailable(format!("Upstream request failed: {err}"))
    }
}

fn expect_patient(patient: Patient) -> Result<Patient> {
    patient
        .ensure_resource_type()
        .map_err(|e| CoreError::malformed_response(e.to_string()))?;
    Ok(patient)
}

#[async_trait]
impl PatientGateway for HttpPatientGateway {
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    async fn get_patient(&self, ctx: &RequestContext, id: &str) -> Result<Patient> {
        let budget = self.budget(ctx)?;
        let request = self.client.get(self.patient_url(id));
        let patient = self.execute(request, budget, &[StatusCode::OK]).await?;
        expect_patient(patient)
    }

    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    async fn search_patients(
        &self,
        ctx: &RequestContext,
        params: &SearchParams,
    ) -> Result<Bundle> {
        let budget = self.budget(ctx)?;
        let request = self.client.get(self.search_url(params)?);
        self.execute(request, budget, &[StatusCode::OK]).await
    }

    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    async fn create_patient(&self, ctx: &RequestContext, patient: &Patient) -> Result<Patient> {
        let budget = self.budget(ctx)?;
        let request = self
            .client
            .post(format!("{}/Patient", self.base_url))
            .header(CONTENT_TYPE, FHIR_JSON)
            .body(patient.to_vec()?);
        let created = self
            .execute(request, budget, &[StatusCode::OK, StatusCode::CREATED])
            .await?;
        expect_patient(created)
    }
}
