use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    error_handling::HandleErrorLayer,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use medgate_api::ApiError;
use medgate_storage::DynPatientStore;
use tower::{BoxError, ServiceBuilder};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, cors::CorsLayer,
    timeout::RequestBodyTimeoutLayer, trace::TraceLayer,
};

use crate::cache::{CacheBackend, create_patient_cache};
use crate::config::AppConfig;
use crate::gateway::{DynPatientGateway, HttpPatientGateway};
use crate::middleware::{self as app_middleware, RequestId};
use crate::services::{ExternalPatientService, PatientService};
use crate::{create_cache_backend, create_patient_store, handlers};

/// Shared handler state. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub patients: PatientService,
    pub external: ExternalPatientService,
    /// Deadline handed to each request's [`RequestContext`](crate::context::RequestContext).
    pub request_budget: Duration,
    pub upstream_base_url: Arc<str>,
    pub upstream_fhir_version: Arc<str>,
    /// Tier behind the patient cache, reported by `/readyz`.
    pub cache_backend: CacheBackend,
}

impl AppState {
    pub fn new(
        cfg: &AppConfig,
        store: DynPatientStore,
        gateway: DynPatientGateway,
        cache_backend: CacheBackend,
    ) -> Self {
        let cache = create_patient_cache(&cfg.cache, cache_backend.clone());
        Self {
            patients: PatientService::new(store),
            external: ExternalPatientService::new(gateway, cache, cfg.cache.patient_ttl()),
            request_budget: cfg.write_timeout(),
            upstream_base_url: Arc::from(cfg.upstream.base_url.as_str()),
            upstream_fhir_version: Arc::from(cfg.upstream.fhir_version.as_str()),
            cache_backend,
        }
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/patients",
            get(handlers::list_patients).post(handlers::create_patient),
        )
        .route(
            "/patients/{id}",
            get(handlers::get_patient)
                .put(handlers::update_patient)
                .patch(handlers::patch_patient)
                .delete(handlers::delete_patient),
        )
        .route(
            "/external-patients",
            get(handlers::search_external).post(handlers::create_external),
        )
        .route("/external-patients/{id}", get(handlers::get_external))
        .route(
            "/external-patients/{id}/cached",
            get(handlers::get_external_cached),
        )
        .route(
            "/external-patients/{id}/delayed",
            get(handlers::get_external_delayed),
        )
}

async fn handle_timeout(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::timeout("request exceeded the server write timeout")
    } else {
        ApiError::internal(format!("unhandled middleware error: {err}"))
    }
}

// The panic payload stays in the log; clients get the generic envelope.
fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = %detail, "handler panicked");
    ApiError::internal("internal server error").into_response()
}

pub fn build_app(cfg: &AppConfig, state: AppState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        // Health and info endpoints
        .route("/health", get(handlers::health))
        .route("/readyz", get(handlers::readyz))
        .route("/metadata", get(handlers::metadata))
        .nest(handlers::API_PREFIX, api_routes())
        .fallback(handlers::fallback)
        .with_state(state)
        // Middleware stack, innermost first: body limits -> deadline -> compression/cors -> panics -> trace -> request id
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyTimeoutLayer::new(cfg.read_timeout()))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .timeout(cfg.write_timeout()),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<RequestId>()
                        .map(|id| id.0.as_str())
                        .unwrap_or("");
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(middleware::from_fn(app_middleware::request_id))
}

pub struct MedgateServer {
    addr: SocketAddr,
    app: Router,
    shutdown_timeout: Duration,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    store: Option<DynPatientStore>,
    gateway: Option<DynPatientGateway>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            store: None,
            gateway: None,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Uses `store` instead of building one from `storage` config.
    pub fn with_store(mut self, store: DynPatientStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `gateway` instead of an HTTP client for `upstream.base_url`.
    pub fn with_gateway(mut self, gateway: DynPatientGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Connects the store and cache, then assembles the router.
    pub async fn build(self) -> anyhow::Result<MedgateServer> {
        let cfg = self.config;

        let store = match self.store {
            Some(store) => store,
            None => create_patient_store(&cfg.storage).await?,
        };
        let gateway: DynPatientGateway = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(HttpPatientGateway::new(
                cfg.upstream.base_url.clone(),
                cfg.upstream.timeout(),
            )?),
        };
        let backend = create_cache_backend(&cfg.redis).await;
        // Detached: lives as long as the runtime.
        backend.start_sweeper(cfg.cache.sweep_interval());

        if cfg.bootstrap.seed_demo_patients {
            crate::bootstrap::seed_demo_patients(&store).await;
        }

        let state = AppState::new(&cfg, store, gateway, backend);
        Ok(MedgateServer {
            addr: self.addr,
            app: build_app(&cfg, state),
            shutdown_timeout: cfg.shutdown_timeout(),
        })
    }
}

impl MedgateServer {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until SIGINT/SIGTERM, then drains
    /// in-flight requests for at most `server.shutdown_timeout_secs`.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        tracing::info!("listening on {}", listener.local_addr()?);
        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
        let server = axum::serve(listener, self.app).with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = drain_tx.send(());
        });

        let shutdown_timeout = self.shutdown_timeout;
        let mut server = std::pin::pin!(server.into_future());
        tokio::select! {
            res = &mut server => res?,
            () = async {
                let _ = drain_rx.await;
                tokio::time::sleep(shutdown_timeout).await;
            } => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "graceful shutdown timed out, dropping open connections"
                );
            }
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn panicking_handler_gets_internal_envelope() {
        async fn boom() -> &'static str {
            panic!("index out of bounds")
        }

        let app: Router = Router::new()
            .route("/boom", get(boom))
            .layer(CatchPanicLayer::custom(handle_panic));

        let res = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value =
            serde_json::from_slice(&to_bytes(res.into_body(), 1024).await.unwrap()).unwrap();
        assert_eq!(body["error"], "internal");
        assert!(!body["message"].as_str().unwrap().contains("index out of bounds"));
    }
}
