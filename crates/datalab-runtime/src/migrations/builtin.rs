//! The schema history shipped with datalab.
//!
//! Each revision is embedded from `migrations/<revision>.up.sql` and its
//! `.down.sql` inverse. Predecessors come from the `-- revises:` header.

use datalab_core::error::Result;

use super::chain::MigrationChain;
use super::migration::Migration;

macro_rules! embedded {
    ($($revision:literal),+ $(,)?) => {
        &[$((
            $revision,
            include_str!(concat!("../../migrations/", $revision, ".up.sql")),
            include_str!(concat!("../../migrations/", $revision, ".down.sql")),
        )),+]
    };
}

const BUILTIN: &[(&str, &str, &str)] = embedded![
    "0001_baseline",
    "0002_user_id_server_default",
    "0003_user_role",
    "0004_user_is_superuser",
    "0005_user_credits",
    "0006_user_onboarding",
    "0007_dataset_display_name",
    "0008_dataset_storage_path",
    "0009_dataset_file_original_filename",
    "0010_projects",
    "0011_experiment_artifact_uri",
    "0012_data_quality_analyses",
    "0013_user_credits_smallint",
];

/// All built-in migrations, in file order.
pub fn builtin_migrations() -> Vec<Migration> {
    BUILTIN
        .iter()
        .map(|(revision, up, down)| Migration::from_sql(*revision, *up, *down))
        .collect()
}

/// The built-in migrations as a validated chain.
pub fn builtin_chain() -> Result<MigrationChain> {
    MigrationChain::new(builtin_migrations())
}
