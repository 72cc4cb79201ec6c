use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;

use datalab_runtime::migrations::{
    builtin_chain, load_migrations_from_dir, MigrationChain, MigrationRunner,
};
use datalab_runtime::Database;

use super::{init_tracing, load_config};

/// Revision name accepted by `down --to` meaning "before the first revision".
const BASE_REVISION: &str = "base";

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Load the chain from this directory instead of the built-in one.
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Apply pending migrations.
    Up {
        /// Stop after this revision instead of the head.
        #[arg(long)]
        target: Option<String>,
    },

    /// Revert applied migrations, newest first.
    Down {
        /// Number of migrations to revert.
        #[arg(default_value = "1")]
        count: usize,

        /// Revert until this revision is the newest applied (`base` reverts all).
        #[arg(long, conflicts_with = "count")]
        to: Option<String>,
    },

    /// Show applied and pending migrations.
    Status,

    /// Check that each pending migration's downgrade restores the prior schema.
    Verify,
}

impl MigrateCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let config = load_config(config_path)?;
        init_tracing(&config.logging);

        let chain = self.load_chain()?;

        let db = Database::from_config(&config.database).await?;
        let runner = MigrationRunner::new(db.primary().clone());

        println!();
        println!(
            "  {}  {} Migrations",
            style("⚒️").bold(),
            style("datalab").bold().cyan()
        );
        println!();

        if chain.is_empty() {
            println!("  {} No migrations found", style("ℹ").blue());
            return Ok(());
        }

        match self.action {
            MigrateAction::Up { target } => {
                println!("  {} Running pending migrations...", style("→").dim());
                let applied = runner.upgrade(&chain, target.as_deref()).await?;

                if applied.is_empty() {
                    println!("  {} Already up to date", style("ℹ").blue());
                } else {
                    for revision in &applied {
                        println!("  {} Applied: {}", style("✓").green(), revision);
                    }
                    println!();
                    println!(
                        "  {} Applied {} migration(s)",
                        style("✓").green(),
                        applied.len()
                    );
                }
            }

            MigrateAction::Down { count, to } => {
                let reverted = match to.as_deref() {
                    Some(BASE_REVISION) => runner.downgrade_to(&chain, None).await?,
                    Some(target) => runner.downgrade_to(&chain, Some(target)).await?,
                    None => {
                        if count == 0 {
                            println!("  {} Nothing to revert (count=0)", style("ℹ").blue());
                            return Ok(());
                        }
                        println!(
                            "  {} Reverting {} migration(s)...",
                            style("→").dim(),
                            count
                        );
                        runner.downgrade(&chain, count).await?
                    }
                };

                if reverted.is_empty() {
                    println!("  {} No migrations to revert", style("ℹ").blue());
                } else {
                    for revision in &reverted {
                        println!("  {} Reverted: {}", style("✓").green(), revision);
                    }
                    println!();
                    println!(
                        "  {} Reverted {} migration(s)",
                        style("✓").green(),
                        reverted.len()
                    );
                }
            }

            MigrateAction::Status => {
                let status = runner.status(&chain).await?;

                if !status.applied.is_empty() {
                    println!("  {} Applied:", style("✓").green());
                    for m in &status.applied {
                        println!(
                            "    {} {} {} ({})",
                            style("↓").green(),
                            style(&m.revision).cyan(),
                            style("at").dim(),
                            m.applied_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }

                if !status.pending.is_empty() {
                    if !status.applied.is_empty() {
                        println!();
                    }
                    println!("  {} Pending:", style("○").yellow());
                    for revision in &status.pending {
                        println!("    {} {}", style("→").dim(), style(revision).yellow());
                    }
                }

                if !status.unknown.is_empty() {
                    println!();
                    println!("  {} Not in chain:", style("!").red());
                    for revision in &status.unknown {
                        println!("    {} {}", style("?").red(), style(revision).red());
                    }
                }

                println!();
                println!(
                    "  {} {} applied, {} pending, current: {}",
                    style("ℹ").blue(),
                    status.applied.len(),
                    status.pending.len(),
                    status.current.as_deref().unwrap_or(BASE_REVISION)
                );
            }

            MigrateAction::Verify => {
                println!("  {} Verifying pending migrations...", style("→").dim());
                let results = runner.verify(&chain).await?;

                if results.is_empty() {
                    println!("  {} Nothing pending to verify", style("ℹ").blue());
                }

                let mut failures = 0;
                for round_trip in &results {
                    if round_trip.is_clean() {
                        println!(
                            "  {} {} ({} change(s) reverted)",
                            style("✓").green(),
                            round_trip.revision,
                            round_trip.upgrade_changes.len()
                        );
                    } else {
                        failures += 1;
                        println!("  {} {}", style("✗").red(), round_trip.revision);
                        for residue in &round_trip.residue {
                            println!("      {}", style(residue).dim());
                        }
                    }
                }

                if failures > 0 {
                    println!();
                    anyhow::bail!("{} migration(s) do not round-trip", failures);
                }
            }
        }

        println!();
        db.close().await;
        Ok(())
    }

    fn load_chain(&self) -> Result<MigrationChain> {
        match &self.migrations_dir {
            Some(dir) => {
                let migrations = load_migrations_from_dir(dir).with_context(|| {
                    format!("Failed to load migrations from {}", dir.display())
                })?;
                Ok(MigrationChain::new(migrations)?)
            }
            None => Ok(builtin_chain()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};

    fn migrate(args: &[&str]) -> MigrateCommand {
        let mut argv = vec!["datalab", "migrate"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Migrate(cmd) => cmd,
            _ => panic!("expected migrate"),
        }
    }

    #[test]
    fn test_up_with_target() {
        let cmd = migrate(&["up", "--target", "0007_dataset_display_name"]);
        match cmd.action {
            MigrateAction::Up { target } => {
                assert_eq!(target.as_deref(), Some("0007_dataset_display_name"))
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn test_down_defaults_to_one() {
        match migrate(&["down"]).action {
            MigrateAction::Down { count, to } => {
                assert_eq!(count, 1);
                assert!(to.is_none());
            }
            _ => panic!("expected down"),
        }
    }

    #[test]
    fn test_down_to_conflicts_with_count() {
        let result = Cli::try_parse_from(["datalab", "migrate", "down", "3", "--to", "base"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_builtin_chain_by_default() {
        let chain = migrate(&["status"]).load_chain().unwrap();
        assert_eq!(chain.len(), 13);
    }

    #[test]
    fn test_chain_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001_init.up.sql"), "CREATE TABLE t (id INT);").unwrap();
        std::fs::write(dir.path().join("0001_init.down.sql"), "DROP TABLE t;").unwrap();
        std::fs::write(
            dir.path().join("0002_more.up.sql"),
            "-- revises: 0001_init\nALTER TABLE t ADD COLUMN c INT;",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("0002_more.down.sql"),
            "ALTER TABLE t DROP COLUMN c;",
        )
        .unwrap();

        let path = dir.path().to_str().unwrap();
        let chain = migrate(&["verify", "--migrations-dir", path])
            .load_chain()
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.head().map(|m| m.revision.as_str()), Some("0002_more"));
    }
}
