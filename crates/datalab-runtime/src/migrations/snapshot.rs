use std::collections::BTreeMap;

use datalab_core::error::{DatalabError, Result};
use sqlx::PgConnection;

use super::runner::TRACKING_TABLE;

/// Column shape as reported by `information_schema`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSnapshot {
    pub data_type: String,
    pub max_length: Option<i32>,
    pub nullable: bool,
    pub default: Option<String>,
}

/// Columns and indexes of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    pub columns: BTreeMap<String, ColumnSnapshot>,
    /// Index name to its `CREATE INDEX` definition.
    pub indexes: BTreeMap<String, String>,
}

/// The shape of every table in the `public` schema, excluding migration bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableSnapshot>,
}

impl SchemaSnapshot {
    /// Read the current schema through the given connection.
    ///
    /// Works inside a transaction, so uncommitted DDL is visible.
    pub async fn capture(conn: &mut PgConnection) -> Result<Self> {
        let columns: Vec<(String, String, String, Option<i32>, String, Option<String>)> =
            sqlx::query_as(
                r#"
                SELECT table_name::text,
                       column_name::text,
                       data_type::text,
                       character_maximum_length::int4,
                       is_nullable::text,
                       column_default::text
                FROM information_schema.columns
                WHERE table_schema = 'public' AND table_name <> $1
                "#,
            )
            .bind(TRACKING_TABLE)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| DatalabError::Database(format!("Failed to read columns: {}", e)))?;

        let indexes: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT tablename::text, indexname::text, indexdef
            FROM pg_indexes
            WHERE schemaname = 'public' AND tablename <> $1
            "#,
        )
        .bind(TRACKING_TABLE)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| DatalabError::Database(format!("Failed to read indexes: {}", e)))?;

        let mut snapshot = Self::default();
        for (table, column, data_type, max_length, is_nullable, default) in columns {
            snapshot.tables.entry(table).or_default().columns.insert(
                column,
                ColumnSnapshot {
                    data_type,
                    max_length,
                    nullable: is_nullable == "YES",
                    default,
                },
            );
        }
        for (table, name, definition) in indexes {
            snapshot
                .tables
                .entry(table)
                .or_default()
                .indexes
                .insert(name, definition);
        }

        Ok(snapshot)
    }

    pub fn table(&self, name: &str) -> Option<&TableSnapshot> {
        self.tables.get(name)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnSnapshot> {
        self.tables.get(table).and_then(|t| t.columns.get(column))
    }

    /// Differences needed to turn `self` into `other`, one line each.
    ///
    /// Identical snapshots produce no entries.
    pub fn diff(&self, other: &SchemaSnapshot) -> Vec<String> {
        let mut out = Vec::new();

        for (name, table) in &self.tables {
            let Some(theirs) = other.tables.get(name) else {
                out.push(format!("table {} removed", name));
                continue;
            };

            for (col, ours) in &table.columns {
                match theirs.columns.get(col) {
                    None => out.push(format!("column {}.{} removed", name, col)),
                    Some(c) if c != ours => out.push(format!(
                        "column {}.{} changed from {} to {}",
                        name,
                        col,
                        describe(ours),
                        describe(c)
                    )),
                    Some(_) => {}
                }
            }
            for col in theirs.columns.keys() {
                if !table.columns.contains_key(col) {
                    out.push(format!("column {}.{} added", name, col));
                }
            }

            for (idx, def) in &table.indexes {
                match theirs.indexes.get(idx) {
                    None => out.push(format!("index {} removed", idx)),
                    Some(d) if d != def => out.push(format!("index {} redefined as {}", idx, d)),
                    Some(_) => {}
                }
            }
            for idx in theirs.indexes.keys() {
                if !table.indexes.contains_key(idx) {
                    out.push(format!("index {} added", idx));
                }
            }
        }

        for name in other.tables.keys() {
            if !self.tables.contains_key(name) {
                out.push(format!("table {} added", name));
            }
        }

        out
    }
}

fn describe(col: &ColumnSnapshot) -> String {
    let mut s = match col.max_length {
        Some(len) => format!("{}({})", col.data_type, len),
        None => col.data_type.clone(),
    };
    s.push_str(if col.nullable { " NULL" } else { " NOT NULL" });
    if let Some(default) = &col.default {
        s.push_str(" DEFAULT ");
        s.push_str(default);
    }
    s
}
