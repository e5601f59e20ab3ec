pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod context;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod services;

pub use cache::{CacheBackend, CachedEntry, PatientCache};
pub use config::{
    AppConfig, CacheConfig, OtelConfig, PostgresStorageConfig, RedisConfig, ServerConfig,
    StorageBackend, StorageConfig, UpstreamConfig,
};
pub use context::RequestContext;
pub use gateway::{HttpPatientGateway, PatientGateway};
pub use observability::{finish_tracing, init_tracing, shutdown_tracing};
pub use server::{AppState, MedgateServer, ServerBuilder, build_app};

use medgate_storage::{DynPatientStore, StorageError};

/// Create a cache backend based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: Returns local-only cache (DashMap)
/// - **Redis enabled**: Attempts to connect to Redis, falls back to local on failure
///
/// ## Graceful Degradation
///
/// If Redis connection fails, the system automatically falls back to local-only mode.
pub async fn create_cache_backend(config: &RedisConfig) -> CacheBackend {
    use std::time::Duration;

    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheBackend::new_local();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheBackend::new_local();
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            CacheBackend::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            CacheBackend::new_local()
        }
    }
}

/// Builds the configured patient store. PostgreSQL connects, verifies the
/// connection and applies migrations before returning.
pub async fn create_patient_store(config: &StorageConfig) -> Result<DynPatientStore, StorageError> {
    match config.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory patient store");
            Ok(medgate_db_memory::create_patient_store())
        }
        StorageBackend::Postgres => {
            tracing::info!("Using PostgreSQL patient store");
            medgate_db_postgres::create_patient_store(config.postgres.to_postgres_config()).await
        }
    }
}
