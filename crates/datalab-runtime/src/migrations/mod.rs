mod builtin;
mod chain;
mod migration;
mod runner;
mod snapshot;

pub use builtin::{builtin_chain, builtin_migrations};
pub use chain::MigrationChain;
pub use migration::{load_migrations_from_dir, Migration};
pub use runner::{AppliedMigration, MigrationRunner, MigrationStatus, RoundTrip};
pub use snapshot::{ColumnSnapshot, SchemaSnapshot, TableSnapshot};
