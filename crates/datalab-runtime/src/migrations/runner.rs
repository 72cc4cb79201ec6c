//! Migration runner with cross-process locking.
//!
//! Every operation that changes the schema holds a PostgreSQL session advisory
//! lock on one dedicated connection, so concurrent runners serialize.

use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use datalab_core::error::{DatalabError, Result};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, PgConnection, PgPool, Postgres};
use tracing::{debug, info, warn};

use super::chain::MigrationChain;
use super::migration::Migration;
use super::snapshot::SchemaSnapshot;

/// Table recording which revisions are applied.
pub(crate) const TRACKING_TABLE: &str = "datalab_migrations";

/// Advisory lock key, "DATALAB" in ASCII.
const MIGRATION_LOCK_ID: i64 = 0x44_41_54_41_4C_41_42;

/// A revision recorded in the tracking table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppliedMigration {
    pub revision: String,
    pub down_revision: Option<String>,
    pub description: Option<String>,
    pub checksum: Option<String>,
    pub execution_time_ms: Option<i32>,
    pub applied_at: DateTime<Utc>,
}

/// Applied and pending revisions relative to a chain.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Applied revisions in chain order.
    pub applied: Vec<AppliedMigration>,
    /// Revisions not yet applied, in apply order.
    pub pending: Vec<String>,
    /// Recorded revisions the chain does not know about.
    pub unknown: Vec<String>,
    /// Newest applied revision of the chain.
    pub current: Option<String>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty() && self.unknown.is_empty()
    }
}

/// Outcome of applying and reverting one revision.
#[derive(Debug, Clone)]
pub struct RoundTrip {
    pub revision: String,
    /// What the upgrade changed.
    pub upgrade_changes: Vec<String>,
    /// Differences left behind after upgrade followed by downgrade.
    pub residue: Vec<String>,
}

impl RoundTrip {
    /// True when the downgrade restored the prior schema exactly.
    pub fn is_clean(&self) -> bool {
        self.residue.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Applies and reverts migration chains against PostgreSQL.
pub struct MigrationRunner {
    pool: PgPool,
}

impl MigrationRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending revisions up to `target`, or to the head when `None`.
    ///
    /// Returns the revisions applied, oldest first.
    pub async fn upgrade(&self, chain: &MigrationChain, target: Option<&str>) -> Result<Vec<String>> {
        let mut session = LockedSession::acquire(&self.pool).await?;
        let result = session.upgrade(chain, target).await;
        session.release().await;
        result
    }

    /// Revert the last `count` applied revisions, newest first.
    pub async fn downgrade(&self, chain: &MigrationChain, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut session = LockedSession::acquire(&self.pool).await?;
        let result = session.downgrade(chain, count).await;
        session.release().await;
        result
    }

    /// Revert until `target` is the newest applied revision.
    ///
    /// `None` reverts every applied revision.
    pub async fn downgrade_to(
        &self,
        chain: &MigrationChain,
        target: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut session = LockedSession::acquire(&self.pool).await?;
        let result = session.downgrade_to(chain, target).await;
        session.release().await;
        result
    }

    /// Report applied and pending revisions without changing anything.
    pub async fn status(&self, chain: &MigrationChain) -> Result<MigrationStatus> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            DatalabError::Database(format!("Failed to acquire connection: {}", e))
        })?;

        let recorded = if tracking_table_exists(&mut conn).await? {
            applied_migrations(&mut conn).await?
        } else {
            Vec::new()
        };

        let mut status = MigrationStatus::default();
        let mut applied_revisions = HashSet::new();
        let mut known = Vec::new();
        for m in recorded {
            if chain.position(&m.revision).is_some() {
                applied_revisions.insert(m.revision.clone());
                known.push(m);
            } else {
                status.unknown.push(m.revision);
            }
        }
        known.sort_by_key(|m| chain.position(&m.revision));

        for step in chain.steps() {
            if applied_revisions.contains(&step.revision) {
                status.current = Some(step.revision.clone());
            } else {
                status.pending.push(step.revision.clone());
            }
        }
        status.applied = known;

        Ok(status)
    }

    /// Check that every pending revision's downgrade undoes its upgrade.
    ///
    /// Runs inside a transaction that is always rolled back, so the database
    /// is left untouched.
    pub async fn verify(&self, chain: &MigrationChain) -> Result<Vec<RoundTrip>> {
        let mut session = LockedSession::acquire(&self.pool).await?;
        let result = session.verify(chain).await;
        session.release().await;
        result
    }
}

/// A pooled connection holding the migration advisory lock.
///
/// The pool's per-connection `statement_timeout` is lifted for the session so
/// long-running steps and lock waits are not cancelled, and restored on release.
struct LockedSession {
    conn: PoolConnection<Postgres>,
    statement_timeout: String,
}

impl LockedSession {
    async fn acquire(pool: &PgPool) -> Result<Self> {
        let mut conn = pool.acquire().await.map_err(|e| {
            DatalabError::Database(format!("Failed to acquire connection: {}", e))
        })?;

        let statement_timeout: String = sqlx::query_scalar("SHOW statement_timeout")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                DatalabError::Database(format!("Failed to read statement timeout: {}", e))
            })?;
        sqlx::query("SET statement_timeout = 0")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                DatalabError::Database(format!("Failed to lift statement timeout: {}", e))
            })?;

        debug!("Acquiring migration lock...");
        let locked = sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *conn)
            .await;
        if let Err(e) = locked {
            // Never hand a connection without its timeout back to the pool.
            drop(conn.detach());
            return Err(DatalabError::Database(format!(
                "Failed to acquire migration lock: {}",
                e
            )));
        }
        debug!("Migration lock acquired");

        Ok(Self {
            conn,
            statement_timeout,
        })
    }

    async fn release(mut self) {
        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_ID)
            .execute(&mut *self.conn)
            .await;
        let restored = match unlocked {
            Ok(_) => {
                debug!("Migration lock released");
                sqlx::query("SELECT set_config('statement_timeout', $1, false)")
                    .bind(&self.statement_timeout)
                    .execute(&mut *self.conn)
                    .await
            }
            Err(e) => {
                warn!("Failed to release migration lock: {}", e);
                Err(e)
            }
        };

        if let Err(e) = restored {
            debug!("Discarding migration connection: {}", e);
            // Session state is unknown; closing it drops the lock too.
            if let Err(e) = self.conn.detach().close().await {
                warn!("Failed to close migration connection: {}", e);
            }
        }
    }

    /// Number of chain steps applied, after checking they form a prefix.
    async fn applied_prefix(&mut self, chain: &MigrationChain) -> Result<usize> {
        ensure_tracking_table(&mut self.conn).await?;
        let applied = applied_migrations(&mut self.conn).await?;
        debug!(
            "Already applied migrations: {:?}",
            applied.iter().map(|m| &m.revision).collect::<Vec<_>>()
        );
        applied_prefix_len(chain, &applied)
    }

    async fn upgrade(&mut self, chain: &MigrationChain, target: Option<&str>) -> Result<Vec<String>> {
        let current = self.applied_prefix(chain).await?;
        let end = match target {
            Some(rev) => chain.require(rev)? + 1,
            None => chain.len(),
        };

        if end < current {
            return Err(DatalabError::MigrationOrder(format!(
                "target '{}' is behind the current revision '{}'; downgrade instead",
                chain.steps()[end - 1].revision,
                chain.steps()[current - 1].revision
            )));
        }

        let mut applied = Vec::new();
        for step in &chain.steps()[current..end] {
            self.apply(step, Direction::Up).await?;
            applied.push(step.revision.clone());
        }
        Ok(applied)
    }

    async fn downgrade(&mut self, chain: &MigrationChain, count: usize) -> Result<Vec<String>> {
        let current = self.applied_prefix(chain).await?;
        let start = current.saturating_sub(count);
        self.revert_range(chain, start, current).await
    }

    async fn downgrade_to(
        &mut self,
        chain: &MigrationChain,
        target: Option<&str>,
    ) -> Result<Vec<String>> {
        let current = self.applied_prefix(chain).await?;
        let start = match target {
            Some(rev) => chain.require(rev)? + 1,
            None => 0,
        };

        if start > current {
            return Err(DatalabError::MigrationOrder(format!(
                "target '{}' is not applied yet; upgrade instead",
                chain.steps()[start - 1].revision
            )));
        }

        self.revert_range(chain, start, current).await
    }

    async fn revert_range(
        &mut self,
        chain: &MigrationChain,
        start: usize,
        end: usize,
    ) -> Result<Vec<String>> {
        let mut reverted = Vec::new();
        for step in chain.steps()[start..end].iter().rev() {
            self.apply(step, Direction::Down).await?;
            reverted.push(step.revision.clone());
        }
        Ok(reverted)
    }

    /// Run one step and update the tracking table in a single transaction.
    async fn apply(&mut self, migration: &Migration, direction: Direction) -> Result<()> {
        match direction {
            Direction::Up => info!("Applying migration: {}", migration.revision),
            Direction::Down => info!("Reverting migration: {}", migration.revision),
        }
        let start = Instant::now();

        let mut tx = self.conn.begin().await.map_err(|e| {
            DatalabError::Database(format!("Failed to begin migration transaction: {}", e))
        })?;

        run_statements(&mut tx, migration, direction).await?;

        let elapsed_ms = i32::try_from(start.elapsed().as_millis()).unwrap_or(i32::MAX);
        let recorded = match direction {
            Direction::Up => {
                sqlx::query(&format!(
                    "INSERT INTO {} (revision, down_revision, description, checksum, execution_time_ms) \
                     VALUES ($1, $2, $3, $4, $5)",
                    TRACKING_TABLE
                ))
                .bind(&migration.revision)
                .bind(&migration.down_revision)
                .bind(&migration.description)
                .bind(migration.checksum())
                .bind(elapsed_ms)
                .execute(&mut *tx)
                .await
            }
            Direction::Down => {
                sqlx::query(&format!("DELETE FROM {} WHERE revision = $1", TRACKING_TABLE))
                    .bind(&migration.revision)
                    .execute(&mut *tx)
                    .await
            }
        };
        recorded.map_err(|e| {
            DatalabError::Database(format!(
                "Failed to record migration '{}': {}",
                migration.revision, e
            ))
        })?;

        tx.commit().await.map_err(|e| {
            DatalabError::Migration(format!(
                "Failed to commit migration '{}': {}",
                migration.revision, e
            ))
        })?;

        match direction {
            Direction::Up => info!("Migration applied: {} ({} ms)", migration.revision, elapsed_ms),
            Direction::Down => info!("Migration reverted: {} ({} ms)", migration.revision, elapsed_ms),
        }
        Ok(())
    }

    async fn verify(&mut self, chain: &MigrationChain) -> Result<Vec<RoundTrip>> {
        let current = self.applied_prefix(chain).await?;

        let mut tx = self.conn.begin().await.map_err(|e| {
            DatalabError::Database(format!("Failed to begin verification transaction: {}", e))
        })?;

        let mut results = Vec::new();
        for step in &chain.steps()[current..] {
            debug!("Verifying round trip of {}", step.revision);
            let before = SchemaSnapshot::capture(&mut tx).await?;
            run_statements(&mut tx, step, Direction::Up).await?;
            let upgraded = SchemaSnapshot::capture(&mut tx).await?;
            run_statements(&mut tx, step, Direction::Down).await?;
            let restored = SchemaSnapshot::capture(&mut tx).await?;
            // Leave the step applied so the next one sees its predecessor.
            run_statements(&mut tx, step, Direction::Up).await?;

            let round_trip = RoundTrip {
                revision: step.revision.clone(),
                upgrade_changes: before.diff(&upgraded),
                residue: before.diff(&restored),
            };
            if !round_trip.is_clean() {
                warn!(
                    "Downgrade of {} does not restore the schema: {:?}",
                    step.revision, round_trip.residue
                );
            }
            results.push(round_trip);
        }

        tx.rollback().await.map_err(|e| {
            DatalabError::Database(format!("Failed to roll back verification: {}", e))
        })?;

        Ok(results)
    }
}

async fn run_statements(
    conn: &mut PgConnection,
    migration: &Migration,
    direction: Direction,
) -> Result<()> {
    let statements = match direction {
        Direction::Up => migration.up_statements(),
        Direction::Down => migration.down_statements(),
    };

    for statement in &statements {
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                let verb = match direction {
                    Direction::Up => "apply",
                    Direction::Down => "revert",
                };
                DatalabError::Migration(format!(
                    "Failed to {} migration '{}': {}",
                    verb, migration.revision, e
                ))
            })?;
    }
    Ok(())
}

async fn ensure_tracking_table(conn: &mut PgConnection) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            revision VARCHAR(255) PRIMARY KEY,
            down_revision VARCHAR(255),
            description TEXT,
            checksum VARCHAR(64),
            execution_time_ms INTEGER,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
        TRACKING_TABLE
    ))
    .execute(&mut *conn)
    .await
    .map_err(|e| DatalabError::Database(format!("Failed to create migrations table: {}", e)))?;
    Ok(())
}

async fn tracking_table_exists(conn: &mut PgConnection) -> Result<bool> {
    sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
        .bind(format!("public.{}", TRACKING_TABLE))
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| DatalabError::Database(format!("Failed to inspect migrations table: {}", e)))
}

async fn applied_migrations(conn: &mut PgConnection) -> Result<Vec<AppliedMigration>> {
    sqlx::query_as::<_, AppliedMigration>(&format!(
        "SELECT revision, down_revision, description, checksum, execution_time_ms, applied_at \
         FROM {} ORDER BY applied_at, revision",
        TRACKING_TABLE
    ))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| DatalabError::Database(format!("Failed to get applied migrations: {}", e)))
}

/// Check that the recorded revisions are exactly the first N steps of the chain.
fn applied_prefix_len(chain: &MigrationChain, applied: &[AppliedMigration]) -> Result<usize> {
    let mut positions = BTreeSet::new();
    for m in applied {
        let pos = chain.position(&m.revision).ok_or_else(|| {
            DatalabError::MigrationOrder(format!(
                "applied revision '{}' is not part of the migration chain",
                m.revision
            ))
        })?;

        let step = &chain.steps()[pos];
        if let Some(recorded) = &m.checksum {
            if *recorded != step.checksum() {
                warn!("Migration {} changed after it was applied", m.revision);
            }
        }
        positions.insert(pos);
    }

    if let Some(missing) = (0..positions.len()).find(|i| !positions.contains(i)) {
        return Err(DatalabError::MigrationOrder(format!(
            "revision '{}' is not applied but later revisions are",
            chain.steps()[missing].revision
        )));
    }

    Ok(positions.len())
}
