#![allow(dead_code)]

use datalab_core::testing::{IsolatedTestDb, TestDatabase};
use datalab_runtime::migrations::{MigrationChain, MigrationRunner, SchemaSnapshot};
use sqlx::PgPool;

/// A fresh database for one test.
///
/// Uses `TEST_DATABASE_URL` when set, otherwise the embedded server when the
/// `embedded-test-db` feature is on. Returns `None` (and says so on stderr)
/// when neither is available.
pub async fn isolated(test_name: &str) -> Option<IsolatedTestDb> {
    let db = match TestDatabase::from_env_optional()
        .await
        .expect("connect to TEST_DATABASE_URL")
    {
        Some(db) => db,
        None => fallback_server(test_name).await?,
    };
    Some(
        db.isolated(test_name)
            .await
            .expect("create isolated database"),
    )
}

#[cfg(feature = "embedded-test-db")]
async fn fallback_server(_test_name: &str) -> Option<TestDatabase> {
    Some(
        TestDatabase::embedded()
            .await
            .expect("start embedded PostgreSQL"),
    )
}

#[cfg(not(feature = "embedded-test-db"))]
async fn fallback_server(test_name: &str) -> Option<TestDatabase> {
    eprintln!(
        "SKIPPED {}: no database. Set TEST_DATABASE_URL or run with --features embedded-test-db",
        test_name
    );
    None
}

pub async fn snapshot(pool: &PgPool) -> SchemaSnapshot {
    let mut conn = pool.acquire().await.unwrap();
    SchemaSnapshot::capture(&mut conn).await.unwrap()
}

pub async fn upgrade_to(pool: &PgPool, chain: &MigrationChain, revision: &str) {
    MigrationRunner::new(pool.clone())
        .upgrade(chain, Some(revision))
        .await
        .unwrap();
}
