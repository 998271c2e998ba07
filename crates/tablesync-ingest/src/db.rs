//! Connection pool setup

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Open a pool. Connections are acquired lazily, one per entity type.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[tokio::test]
    async fn test_unreachable_database_is_write_failure() {
        let config = DatabaseConfig {
            url: "postgresql://tablesync@127.0.0.1:1/nowhere".to_string(),
            max_connections: 1,
            connect_timeout_secs: 1,
        };

        let err = create_pool(&config).await.unwrap_err();
        assert!(matches!(err, SyncError::WriteFailure(_)));
    }

    #[sqlx::test(migrations = "../../migrations")]
    #[ignore] // Requires database
    async fn test_health_check(pool: PgPool) {
        health_check(&pool).await.unwrap();
    }
}
