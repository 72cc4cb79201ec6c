use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;

use datalab_core::config::DatabaseConfig;
use datalab_core::error::{DatalabError, Result};

/// Database connection wrapper providing connection pooling.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let pool = Self::create_pool(config)
            .await
            .map_err(|e| DatalabError::Database(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    async fn create_pool(config: &DatabaseConfig) -> sqlx::Result<PgPool> {
        let statement_timeout = config.statement_timeout_secs;

        PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if statement_timeout > 0 {
                        conn.execute(
                            format!("SET statement_timeout = '{}s'", statement_timeout).as_str(),
                        )
                        .await?;
                    }
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
    }

    /// Get the connection pool.
    pub fn primary(&self) -> &PgPool {
        &self.pool
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DatalabError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
