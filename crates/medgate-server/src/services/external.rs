//! Upstream Patient access with read-through caching and deadline-bounded reads.

use std::sync::Arc;
use std::time::Duration;

use medgate_core::{Bundle, CoreError, Patient, Result};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, instrument, warn};

use crate::cache::PatientCache;
use crate::context::RequestContext;
use crate::gateway::{DynPatientGateway, SearchParams};

#[derive(Clone)]
pub struct ExternalPatientService {
    gateway: DynPatientGateway,
    cache: Arc<dyn PatientCache>,
    cache_ttl: Duration,
}

impl ExternalPatientService {
    pub fn new(
        gateway: DynPatientGateway,
        cache: Arc<dyn PatientCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            gateway,
            cache,
            cache_ttl,
        }
    }

    pub async fn get(&self, ctx: &RequestContext, id: &str) -> Result<Patient> {
        self.gateway.get_patient(ctx, id).await
    }

    /// Serves from the cache when possible. Only successful upstream reads are
    /// written back.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn get_cached(&self, ctx: &RequestContext, id: &str) -> Result<Patient> {
        if let Some(patient) = self.cache.get(id).await {
            debug!("Cache hit");
            return Ok(patient);
        }

        debug!("Cache miss");
        let patient = self.gateway.get_patient(ctx, id).await?;
        self.cache.set(id, &patient, self.cache_ttl).await;
        Ok(patient)
    }

    /// Races the upstream read against `timeout`, capped by the request
    /// deadline. The losing upstream call is aborted.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn get_delayed(
        &self,
        ctx: &RequestContext,
        id: &str,
        timeout: Duration,
    ) -> Result<Patient> {
        let bounded = ctx.with_timeout(timeout);
        if bounded.is_expired() {
            return Err(CoreError::timeout("request deadline already elapsed"));
        }
        let budget = bounded.remaining();

        let gateway = Arc::clone(&self.gateway);
        let task_ctx = bounded.clone();
        let task_id = id.to_owned();
        let mut task = AbortOnDropHandle::new(tokio::spawn(async move {
            gateway.get_patient(&task_ctx, &task_id).await
        }));

        tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) => Err(CoreError::internal(format!("Upstream read task failed: {e}"))),
            },
            () = tokio::time::sleep_until(bounded.deadline) => {
                task.abort();
                warn!(budget_ms = budget.as_millis() as u64, "Upstream read timed out");
                Err(CoreError::timeout(format!(
                    "upstream did not answer within {}ms",
                    budget.as_millis()
                )))
            }
        }
    }

    pub async fn search(&self, ctx: &RequestContext, params: &SearchParams) -> Result<Bundle> {
        self.gateway.search_patients(ctx, params).await
    }

    /// Creates the patient upstream. The result is not cached.
    pub async fn create(&self, ctx: &RequestContext, patient: &Patient) -> Result<Patient> {
        patient.ensure_resource_type()?;
        self.gateway.create_patient(ctx, patient).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cache::{BackendPatientCache, CacheBackend, DisabledPatientCache};
    use crate::gateway::PatientGateway;

    /// Upstream double: answers after `delay`, or fails with 503 when `fail`.
    /// `cancelled` flips when a read is dropped before it finished.
    struct FakeGateway {
        calls: AtomicUsize,
        cancelled: AtomicBool,
        delay: Duration,
        fail: bool,
    }

    struct DropFlag<'a> {
        flag: &'a AtomicBool,
        finished: bool,
    }

    impl Drop for DropFlag<'_> {
        fn drop(&mut self) {
            if !self.finished {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
    }

    impl FakeGateway {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                cancelled: AtomicBool::new(false),
                delay,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn was_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PatientGateway for FakeGateway {
        async fn get_patient(&self, _ctx: &RequestContext, id: &str) -> Result<Patient> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut in_flight = DropFlag {
                flag: &self.cancelled,
                finished: false,
            };
            tokio::time::sleep(self.delay).await;
            in_flight.finished = true;
            if self.fail {
                return Err(CoreError::upstream(503, "unavailable"));
            }
            Ok(Patient {
                id: Some(id.to_owned()),
                ..Default::default()
            })
        }

        async fn search_patients(
            &self,
            _ctx: &RequestContext,
            params: &SearchParams,
        ) -> Result<Bundle> {
            Ok(serde_json::from_value(json!({
                "resourceType": "Bundle",
                "type": "searchset",
                "total": params.len()
            }))
            .unwrap())
        }

        async fn create_patient(&self, _ctx: &RequestContext, patient: &Patient) -> Result<Patient> {
            let mut created = patient.clone();
            created.id = Some("created".into());
            Ok(created)
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::background(Duration::from_secs(5))
    }

    fn service(gateway: Arc<FakeGateway>) -> ExternalPatientService {
        let cache = Arc::new(BackendPatientCache::new(CacheBackend::new_local()));
        ExternalPatientService::new(gateway, cache, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn cached_read_hits_upstream_once() {
        let gateway = FakeGateway::new(Duration::ZERO, false);
        let svc = service(gateway.clone());

        let first = svc.get_cached(&ctx(), "ABC").await.unwrap();
        let second = svc.get_cached(&ctx(), "ABC").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn plain_read_bypasses_cache() {
        let gateway = FakeGateway::new(Duration::ZERO, false);
        let svc = service(gateway.clone());

        svc.get(&ctx(), "ABC").await.unwrap();
        svc.get(&ctx(), "ABC").await.unwrap();
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let failing = FakeGateway::new(Duration::ZERO, true);
        let cache: Arc<dyn PatientCache> =
            Arc::new(BackendPatientCache::new(CacheBackend::new_local()));
        let svc = ExternalPatientService::new(failing.clone(), cache.clone(), Duration::from_secs(60));

        assert!(svc.get_cached(&ctx(), "X").await.is_err());
        assert!(svc.get_cached(&ctx(), "X").await.is_err());
        assert_eq!(failing.calls(), 2);
        assert!(cache.get("X").await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_always_calls_upstream() {
        let gateway = FakeGateway::new(Duration::ZERO, false);
        let svc = ExternalPatientService::new(
            gateway.clone(),
            Arc::new(DisabledPatientCache),
            Duration::from_secs(60),
        );
        svc.get_cached(&ctx(), "A").await.unwrap();
        svc.get_cached(&ctx(), "A").await.unwrap();
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn delayed_read_returns_fast_answer() {
        let svc = service(FakeGateway::new(Duration::from_millis(10), false));
        let patient = svc
            .get_delayed(&ctx(), "fast", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(patient.id.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn delayed_read_times_out() {
        let svc = service(FakeGateway::new(Duration::from_secs(5), false));
        let started = std::time::Instant::now();
        let err = svc
            .get_delayed(&ctx(), "slow", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn delayed_read_cancels_the_upstream_call() {
        let gateway = FakeGateway::new(Duration::from_secs(5), false);
        let svc = service(gateway.clone());
        let err = svc
            .get_delayed(&ctx(), "slow", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        // The abort is delivered when the runtime next polls the task.
        for _ in 0..50 {
            if gateway.was_cancelled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gateway.was_cancelled());
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn delayed_read_lets_finished_call_complete() {
        let gateway = FakeGateway::new(Duration::from_millis(10), false);
        let svc = service(gateway.clone());
        svc.get_delayed(&ctx(), "fast", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(!gateway.was_cancelled());
    }

    #[tokio::test]
    async fn delayed_read_honours_expired_request() {
        let gateway = FakeGateway::new(Duration::ZERO, false);
        let svc = service(gateway.clone());
        let expired = RequestContext::background(Duration::ZERO);
        let err = svc
            .get_delayed(&expired, "x", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn create_and_search_go_upstream() {
        let svc = service(FakeGateway::new(Duration::ZERO, false));
        let created = svc.create(&ctx(), &Patient::default()).await.unwrap();
        assert_eq!(created.id.as_deref(), Some("created"));

        let params = SearchParams::from([("family".to_string(), "Doe".to_string())]);
        let bundle = svc.search(&ctx(), &params).await.unwrap();
        assert_eq!(bundle.total, Some(1));
    }
}
