pub mod db;
pub mod gateway;
pub mod migrations;

pub use db::Database;
pub use gateway::{ApiError, GatewayServer};
pub use migrations::{
    builtin_chain, load_migrations_from_dir, Migration, MigrationChain, MigrationRunner,
    MigrationStatus, SchemaSnapshot,
};
