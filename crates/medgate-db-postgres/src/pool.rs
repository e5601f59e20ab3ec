//! Pool construction for the patient store.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};
use url::Url;

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(3600);

/// Pool limits derived from `config`.
///
/// The idle floor defaults to a quarter of the pool and is kept within
/// `1..=pool_size`, so a small pool never asks for more idle connections
/// than it may open.
pub(crate) fn pool_options(config: &PostgresConfig) -> Result<PgPoolOptions> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be at least 1"));
    }
    let min_connections = config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .clamp(1, config.pool_size);
    let max_lifetime = config
        .max_lifetime_secs
        .map_or(DEFAULT_MAX_LIFETIME, Duration::from_secs);

    Ok(PgPoolOptions::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .max_lifetime(max_lifetime)
        .idle_timeout(config.idle_timeout_ms.map(Duration::from_millis))
        .test_before_acquire(false))
}

/// Opens the pool. The URL only reaches the logs with its password redacted.
#[instrument(skip(config), fields(db = %redact_url(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    let options = pool_options(config)?;
    info!(
        max_connections = options.get_max_connections(),
        min_connections = options.get_min_connections(),
        "Opening patient store pool"
    );
    let pool = options.connect(&config.url).await?;
    debug!("Patient store pool ready");
    Ok(pool)
}

/// One round trip, so a bad host or credentials fail startup instead of the
/// first request.
#[instrument(skip(pool))]
pub(crate) async fn ping(pool: &PgPool) -> Result<()> {
    sqlx_core::query::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Replaces the password with `****`. Unparseable input is not echoed back,
/// since it may still carry a secret.
pub(crate) fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        _ => "<unparseable database url>".to_string(),
    }
}
