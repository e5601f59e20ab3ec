//! Read-through cache of upstream `Patient` resources.
//!
//! Entries are the FHIR JSON of the resource under `patient:{id}`, so the same
//! backing store can hold other namespaces.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use medgate_core::Patient;

use super::backend::CacheBackend;
use crate::config::CacheConfig;

/// Namespaced cache key for an upstream patient id.
pub fn patient_key(id: &str) -> String {
    format!("patient:{id}")
}

/// Cache of upstream patients.
///
/// Every method is infallible from the caller's side: backend errors are
/// logged and a failed read is a miss.
#[async_trait]
pub trait PatientCache: Send + Sync {
    async fn get(&self, id: &str) -> Option<Patient>;

    /// Stores `patient` until now + `ttl`.
    async fn set(&self, id: &str, patient: &Patient, ttl: Duration);

    async fn invalidate(&self, id: &str);
}

/// `PatientCache` over the shared L1/L2 [`CacheBackend`].
pub struct BackendPatientCache {
    backend: CacheBackend,
}

impl BackendPatientCache {
    pub fn new(backend: CacheBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl PatientCache for BackendPatientCache {
    async fn get(&self, id: &str) -> Option<Patient> {
        let key = patient_key(id);
        let bytes = self.backend.get(&key).await?;
        match Patient::from_slice(&bytes) {
            Ok(patient) => Some(patient),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable cache entry");
                self.backend.invalidate(&key).await;
                None
            }
        }
    }

    async fn set(&self, id: &str, patient: &Patient, ttl: Duration) {
        let key = patient_key(id);
        match patient.to_vec() {
            Ok(bytes) => self.backend.set(&key, bytes, ttl).await,
            Err(e) => tracing::warn!(key = %key, error = %e, "failed to encode patient for cache"),
        }
    }

    async fn invalidate(&self, id: &str) {
        self.backend.invalidate(&patient_key(id)).await;
    }
}

/// Permanent miss, used when `cache.enabled = false`.
pub struct DisabledPatientCache;

#[async_trait]
impl PatientCache for DisabledPatientCache {
    async fn get(&self, _id: &str) -> Option<Patient> {
        None
    }

    async fn set(&self, _id: &str, _patient: &Patient, _ttl: Duration) {
        // No-op
    }

    async fn invalidate(&self, _id: &str) {
        // No-op
    }
}

/// Create the shared patient cache for the configured mode.
pub fn create_patient_cache(config: &CacheConfig, backend: CacheBackend) -> Arc<dyn PatientCache> {
    if config.enabled {
        Arc::new(BackendPatientCache::new(backend))
    } else {
        tracing::info!("Patient cache disabled");
        Arc::new(DisabledPatientCache)
    }
}
