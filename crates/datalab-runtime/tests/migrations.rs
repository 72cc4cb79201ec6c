mod common;

use common::{isolated, snapshot, upgrade_to};
use datalab_core::assert_err_variant;
use datalab_core::config::DatabaseConfig;
use datalab_core::error::DatalabError;
use datalab_core::models::{display_name_for, DATASET_DISPLAY_NAMES};
use datalab_runtime::migrations::{builtin_chain, Migration, MigrationChain, MigrationRunner};
use datalab_runtime::Database;

#[tokio::test]
async fn every_step_downgrade_restores_prior_schema() {
    let Some(db) = isolated("round_trip").await else {
        return;
    };
    let chain = builtin_chain().unwrap();
    let runner = MigrationRunner::new(db.pool().clone());

    for step in chain.steps() {
        let before = snapshot(db.pool()).await;

        runner.upgrade(&chain, Some(&step.revision)).await.unwrap();
        let upgraded = snapshot(db.pool()).await;
        assert!(
            !before.diff(&upgraded).is_empty(),
            "{} changed nothing",
            step.revision
        );

        let reverted = runner.downgrade(&chain, 1).await.unwrap();
        assert_eq!(reverted, vec![step.revision.clone()]);
        let restored = snapshot(db.pool()).await;
        assert_eq!(
            before.diff(&restored),
            Vec::<String>::new(),
            "downgrade of {} left residue",
            step.revision
        );

        runner.upgrade(&chain, Some(&step.revision)).await.unwrap();
    }

    let status = runner.status(&chain).await.unwrap();
    assert!(status.is_up_to_date());

    let reverted = runner.downgrade_to(&chain, None).await.unwrap();
    assert_eq!(reverted.len(), chain.len());
    assert!(snapshot(db.pool()).await.tables.is_empty());

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn verify_reports_clean_round_trips_and_changes_nothing() {
    let Some(db) = isolated("verify").await else {
        return;
    };
    let chain = builtin_chain().unwrap();
    let runner = MigrationRunner::new(db.pool().clone());

    upgrade_to(db.pool(), &chain, "0004_user_is_superuser").await;
    let before = snapshot(db.pool()).await;

    let results = runner.verify(&chain).await.unwrap();
    assert_eq!(results.len(), chain.len() - 4);
    assert_eq!(results[0].revision, "0005_user_credits");
    for round_trip in &results {
        assert!(round_trip.is_clean(), "{}: {:?}", round_trip.revision, round_trip.residue);
        assert!(!round_trip.upgrade_changes.is_empty());
    }

    assert!(before.diff(&snapshot(db.pool()).await).is_empty());
    let status = runner.status(&chain).await.unwrap();
    assert_eq!(status.current.as_deref(), Some("0004_user_is_superuser"));
    assert_eq!(status.pending.len(), chain.len() - 4);

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn superuser_flag_follows_admin_role() {
    let Some(db) = isolated("superuser_backfill").await else {
        return;
    };
    let chain = builtin_chain().unwrap();

    upgrade_to(db.pool(), &chain, "0003_user_role").await;
    db.execute(
        "INSERT INTO users (email, hashed_password, role) VALUES \
         ('root@example.com', 'x', 'admin'), \
         ('ada@example.com', 'x', 'user'), \
         ('bob@example.com', 'x', 'analyst')",
    )
    .await
    .unwrap();
    db.execute("INSERT INTO users (email, hashed_password) VALUES ('eve@example.com', 'x')")
        .await
        .unwrap();

    upgrade_to(db.pool(), &chain, "0004_user_is_superuser").await;

    let rows: Vec<(String, String, bool)> =
        sqlx::query_as("SELECT email, role, is_superuser FROM users ORDER BY email")
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert_eq!(rows.len(), 4);
    for (email, role, is_superuser) in rows {
        assert_eq!(is_superuser, role == "admin", "{}", email);
    }

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn display_name_backfill_maps_known_datasets() {
    let Some(db) = isolated("display_name_backfill").await else {
        return;
    };
    let chain = builtin_chain().unwrap();

    upgrade_to(db.pool(), &chain, "0006_user_onboarding").await;
    for (name, _) in DATASET_DISPLAY_NAMES {
        sqlx::query("INSERT INTO datasets (name) VALUES ($1)")
            .bind(name)
            .execute(db.pool())
            .await
            .unwrap();
    }
    db.execute("INSERT INTO datasets (name) VALUES ('my_custom_upload')")
        .await
        .unwrap();

    upgrade_to(db.pool(), &chain, "0007_dataset_display_name").await;

    let rows: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT name, display_name FROM datasets")
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert_eq!(rows.len(), DATASET_DISPLAY_NAMES.len() + 1);
    for (name, display_name) in rows {
        assert_eq!(display_name.as_deref(), Some(display_name_for(&name)));
    }
    assert_eq!(display_name_for("oulad_dataset"), "OULAD");
    assert_eq!(display_name_for("my_custom_upload"), "my_custom_upload");

    let schema = snapshot(db.pool()).await;
    let column = schema.column("datasets", "display_name").unwrap();
    assert!(!column.nullable);

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn original_filename_copies_stored_filename() {
    let Some(db) = isolated("original_filename_backfill").await else {
        return;
    };
    let chain = builtin_chain().unwrap();

    upgrade_to(db.pool(), &chain, "0008_dataset_storage_path").await;
    db.execute("INSERT INTO datasets (name, display_name) VALUES ('oulad_dataset', 'OULAD')")
        .await
        .unwrap();
    db.execute(
        "INSERT INTO dataset_files (dataset_id, stored_filename) \
         SELECT id, f FROM datasets, unnest(ARRAY['a1b2.csv', 'c3d4.parquet']) AS f",
    )
    .await
    .unwrap();

    upgrade_to(db.pool(), &chain, "0009_dataset_file_original_filename").await;

    let mismatched: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM dataset_files \
         WHERE original_filename IS DISTINCT FROM stored_filename",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(mismatched, 0);

    let schema = snapshot(db.pool()).await;
    let column = schema.column("dataset_files", "original_filename").unwrap();
    assert!(!column.nullable);

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn artifact_uri_rename_preserves_values() {
    let Some(db) = isolated("artifact_uri_rename").await else {
        return;
    };
    let chain = builtin_chain().unwrap();
    let runner = MigrationRunner::new(db.pool().clone());

    upgrade_to(db.pool(), &chain, "0010_projects").await;
    db.execute("INSERT INTO experiments (name, model_uri) VALUES ('baseline', 's3://models/1')")
        .await
        .unwrap();

    upgrade_to(db.pool(), &chain, "0011_experiment_artifact_uri").await;
    let uri: Option<String> = sqlx::query_scalar("SELECT artifact_uri FROM experiments")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(uri.as_deref(), Some("s3://models/1"));

    runner.downgrade(&chain, 1).await.unwrap();
    let uri: Option<String> = sqlx::query_scalar("SELECT model_uri FROM experiments")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(uri.as_deref(), Some("s3://models/1"));

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn out_of_order_history_is_rejected() {
    let Some(db) = isolated("ordering").await else {
        return;
    };
    let chain = builtin_chain().unwrap();
    let runner = MigrationRunner::new(db.pool().clone());

    let applied = runner.upgrade(&chain, None).await.unwrap();
    assert_eq!(applied.len(), chain.len());
    assert!(runner.upgrade(&chain, None).await.unwrap().is_empty());

    assert_err_variant!(
        runner.upgrade(&chain, Some("0005_user_credits")).await,
        DatalabError::MigrationOrder(_)
    );

    let reverted = runner
        .downgrade_to(&chain, Some("0005_user_credits"))
        .await
        .unwrap();
    assert_eq!(reverted.first().map(String::as_str), Some("0013_user_credits_smallint"));
    assert_eq!(reverted.last().map(String::as_str), Some("0006_user_onboarding"));

    assert_err_variant!(
        runner.downgrade_to(&chain, Some("0010_projects")).await,
        DatalabError::MigrationOrder(_)
    );

    db.execute("DELETE FROM datalab_migrations WHERE revision = '0003_user_role'")
        .await
        .unwrap();
    assert_err_variant!(
        runner.upgrade(&chain, None).await,
        DatalabError::MigrationOrder(_)
    );

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn failed_step_rolls_back_completely() {
    let Some(db) = isolated("failed_step").await else {
        return;
    };
    let chain = MigrationChain::new(vec![
        Migration::new(
            "a",
            None,
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY); INSERT INTO widgets VALUES (1);",
            "DROP TABLE widgets;",
        ),
        Migration::new(
            "b",
            Some("a"),
            "ALTER TABLE widgets ADD COLUMN colour TEXT; \
             ALTER TABLE widgets ALTER COLUMN colour SET NOT NULL;",
            "ALTER TABLE widgets DROP COLUMN colour;",
        ),
    ])
    .unwrap();
    let runner = MigrationRunner::new(db.pool().clone());

    assert_err_variant!(
        runner.upgrade(&chain, None).await,
        DatalabError::Migration(_)
    );

    let status = runner.status(&chain).await.unwrap();
    assert_eq!(status.current.as_deref(), Some("a"));
    assert_eq!(status.pending, vec!["b".to_string()]);
    assert!(snapshot(db.pool()).await.column("widgets", "colour").is_none());

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn concurrent_runners_apply_each_step_once() {
    let Some(db) = isolated("concurrent_runners").await else {
        return;
    };
    let chain = builtin_chain().unwrap();
    let first = MigrationRunner::new(db.pool().clone());
    let second = MigrationRunner::new(db.pool().clone());

    let (a, b) = tokio::join!(first.upgrade(&chain, None), second.upgrade(&chain, None));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.len() + b.len(), chain.len());

    let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM datalab_migrations")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(recorded as usize, chain.len());

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn deleting_a_dataset_keeps_analyses_and_experiments() {
    let Some(db) = isolated("dataset_delete").await else {
        return;
    };
    let chain = builtin_chain().unwrap();
    upgrade_to(db.pool(), &chain, "0013_user_credits_smallint").await;

    db.execute("INSERT INTO datasets (name, display_name) VALUES ('oulad_dataset', 'OULAD')")
        .await
        .unwrap();
    db.execute(
        "INSERT INTO data_quality_analyses (dataset_id, dataset_version, analysis) \
         SELECT id, 'v1', '{}'::jsonb FROM datasets",
    )
    .await
    .unwrap();
    db.execute("INSERT INTO experiments (dataset_id, name) SELECT id, 'baseline' FROM datasets")
        .await
        .unwrap();
    db.execute(
        "INSERT INTO dataset_files (dataset_id, stored_filename, original_filename) \
         SELECT id, 'a1b2.csv', 'students.csv' FROM datasets",
    )
    .await
    .unwrap();

    db.execute("DELETE FROM datasets").await.unwrap();

    let analyses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_quality_analyses")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(analyses, 1);
    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dataset_files")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(files, 0);

    let orphaned: Option<uuid::Uuid> = sqlx::query_scalar("SELECT dataset_id FROM experiments")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert!(orphaned.is_some());

    db.cleanup().await.unwrap();
}

#[tokio::test]
async fn runner_is_not_bound_by_pool_statement_timeout() {
    let Some(db) = isolated("statement_timeout").await else {
        return;
    };
    let database = Database::from_config(&DatabaseConfig {
        url: db.url().to_string(),
        pool_size: 1,
        statement_timeout_secs: 1,
        ..Default::default()
    })
    .await
    .unwrap();
    let chain = MigrationChain::new(vec![Migration::new(
        "slow",
        None,
        "SELECT pg_sleep(2); CREATE TABLE slow_done (id INTEGER);",
        "DROP TABLE slow_done;",
    )])
    .unwrap();

    let runner = MigrationRunner::new(database.primary().clone());
    assert_eq!(runner.upgrade(&chain, None).await.unwrap(), vec!["slow".to_string()]);

    let timeout: String = sqlx::query_scalar("SHOW statement_timeout")
        .fetch_one(database.primary())
        .await
        .unwrap();
    assert_eq!(timeout, "1s");
    assert!(sqlx::query("SELECT pg_sleep(2)")
        .execute(database.primary())
        .await
        .is_err());

    database.close().await;
    db.cleanup().await.unwrap();
}
