//! Testing utilities for datalab.
//!
//! Database tests run against a real PostgreSQL server named by
//! `TEST_DATABASE_URL`, each inside its own throwaway database.

pub mod db;

pub use db::{IsolatedTestDb, TestDatabase, TEST_DATABASE_URL};

/// Assert that a result is an error matching the given pattern.
///
/// ```ignore
/// assert_err_variant!(chain, DatalabError::MigrationOrder(_));
/// ```
#[macro_export]
macro_rules! assert_err_variant {
    ($expr:expr, $pattern:pat) => {
        match &$expr {
            Err(e) if matches!(e, $pattern) => (),
            Err(e) => panic!(
                "assertion failed: expected {}, got Err({:?})",
                stringify!($pattern),
                e
            ),
            Ok(_) => panic!(
                "assertion failed: expected {}, got Ok",
                stringify!($pattern)
            ),
        }
    };
}
