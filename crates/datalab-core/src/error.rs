use thiserror::Error;

/// Core error type for datalab operations.
#[derive(Error, Debug)]
pub enum DatalabError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// A revision was applied or requested out of predecessor order.
    #[error("Migration order error: {0}")]
    MigrationOrder(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for DatalabError {
    fn from(e: serde_json::Error) -> Self {
        DatalabError::Serialization(e.to_string())
    }
}

/// Result type alias using DatalabError.
pub type Result<T> = std::result::Result<T, DatalabError>;
