//! PostgreSQL implementation of the `PatientStore` trait.

use async_trait::async_trait;
use sqlx_postgres::PgPool;
use tracing::info;

use medgate_storage::{
    PatientColumns, PatientId, PatientRecord, PatientStore, StorageError, StoredPatient,
};

use crate::config::PostgresConfig;
use crate::migrations;
use crate::pool;
use crate::queries;

/// PostgreSQL storage backend for Patient rows.
#[derive(Debug, Clone)]
pub struct PostgresPatientStore {
    pool: PgPool,
}

impl PostgresPatientStore {
    /// Creates a new `PostgresPatientStore` with the given configuration.
    ///
    /// This will:
    /// 1. Create a connection pool
    /// 2. Verify the connection
    /// 3. Run migrations (if configured)
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created
    /// or if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await?;
        pool::ping(&pool).await?;

        if config.run_migrations {
            migrations::run(&pool).await?;
        } else {
            info!("Skipping migrations (run_migrations = false)");
        }

        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PatientStore for PostgresPatientStore {
    async fn insert(&self, record: PatientRecord) -> Result<StoredPatient, StorageError> {
        queries::insert(&self.pool, &record).await
    }

    async fn get(&self, id: PatientId) -> Result<StoredPatient, StorageError> {
        queries::get(&self.pool, id).await
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<StoredPatient>, StorageError> {
        queries::list(&self.pool, limit, offset).await
    }

    async fn update(
        &self,
        id: PatientId,
        record: PatientRecord,
    ) -> Result<StoredPatient, StorageError> {
        queries::update(&self.pool, id, &record).await
    }

    async fn delete(&self, id: PatientId) -> Result<(), StorageError> {
        queries::soft_delete(&self.pool, id).await
    }

    async fn count(&self) -> Result<u64, StorageError> {
        queries::count(&self.pool).await
    }

    async fn exists_matching(&self, columns: &PatientColumns) -> Result<bool, StorageError> {
        queries::exists_matching(&self.pool, columns).await
    }
}
