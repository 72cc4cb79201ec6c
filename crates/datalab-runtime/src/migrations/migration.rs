use std::collections::BTreeSet;
use std::path::Path;

use datalab_core::error::{DatalabError, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";
const REVISES_HEADER: &str = "revises:";

/// A single reversible schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Unique identifier, e.g. `0003_user_role`.
    pub revision: String,
    /// Revision that must be applied before this one. `None` for the root.
    pub down_revision: Option<String>,
    /// One-line summary taken from the leading comment block.
    pub description: String,
    /// Forward SQL.
    pub up_sql: String,
    /// SQL that exactly undoes `up_sql`.
    pub down_sql: String,
}

impl Migration {
    pub fn new(
        revision: impl Into<String>,
        down_revision: Option<&str>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        let up_sql = up_sql.into();
        Self {
            revision: revision.into(),
            down_revision: down_revision.map(String::from),
            description: parse_description(&up_sql),
            up_sql,
            down_sql: down_sql.into(),
        }
    }

    /// Build a migration whose predecessor is declared in the up SQL.
    ///
    /// The leading comment block may contain `-- revises: <revision>`. Without
    /// it the migration is a root.
    pub fn from_sql(
        revision: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> Self {
        let up_sql = up_sql.into();
        let down_revision = parse_down_revision(&up_sql);
        Self {
            revision: revision.into(),
            down_revision,
            description: parse_description(&up_sql),
            up_sql,
            down_sql: down_sql.into(),
        }
    }

    /// Hex SHA-256 of the forward SQL.
    pub fn checksum(&self) -> String {
        hex::encode(Sha256::digest(self.up_sql.as_bytes()))
    }

    pub fn up_statements(&self) -> Vec<String> {
        split_sql_statements(&self.up_sql)
    }

    pub fn down_statements(&self) -> Vec<String> {
        split_sql_statements(&self.down_sql)
    }
}

fn leading_comments(sql: &str) -> impl Iterator<Item = &str> {
    sql.lines()
        .map(str::trim)
        .take_while(|l| l.is_empty() || l.starts_with("--"))
        .filter_map(|l| l.strip_prefix("--").map(str::trim))
}

fn parse_down_revision(sql: &str) -> Option<String> {
    leading_comments(sql)
        .find_map(|l| l.strip_prefix(REVISES_HEADER))
        .map(|rev| rev.trim().to_string())
        .filter(|rev| !rev.is_empty())
}

fn parse_description(sql: &str) -> String {
    leading_comments(sql)
        .find(|l| !l.is_empty() && !l.starts_with(REVISES_HEADER))
        .unwrap_or_default()
        .to_string()
}

/// Load migrations from a directory of `<revision>.up.sql` / `<revision>.down.sql` pairs.
///
/// The result is sorted by revision; predecessor order is established by
/// [`MigrationChain`](super::MigrationChain).
pub fn load_migrations_from_dir(dir: &Path) -> Result<Vec<Migration>> {
    if !dir.exists() {
        debug!("Migrations directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut ups = BTreeSet::new();
    let mut downs = BTreeSet::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };

        if let Some(revision) = file_name.strip_suffix(UP_SUFFIX) {
            ups.insert(revision.to_string());
        } else if let Some(revision) = file_name.strip_suffix(DOWN_SUFFIX) {
            downs.insert(revision.to_string());
        }
    }

    if let Some(orphan) = downs.difference(&ups).next() {
        return Err(DatalabError::Migration(format!(
            "Down migration '{}' has no matching up migration",
            orphan
        )));
    }

    let mut migrations = Vec::with_capacity(ups.len());
    for revision in ups {
        if !downs.contains(&revision) {
            return Err(DatalabError::Migration(format!(
                "Migration '{}' has no down migration",
                revision
            )));
        }

        let up = std::fs::read_to_string(dir.join(format!("{}{}", revision, UP_SUFFIX)))?;
        let down = std::fs::read_to_string(dir.join(format!("{}{}", revision, DOWN_SUFFIX)))?;
        migrations.push(Migration::from_sql(revision, up, down));
    }

    debug!("Loaded {} migrations from {:?}", migrations.len(), dir);
    Ok(migrations)
}

#[derive(Debug, PartialEq, Eq)]
enum Lexer {
    Code,
    /// `escapes` is set for `E'...'` literals, where a backslash escapes the next character.
    SingleQuoted { escapes: bool },
    DoubleQuoted,
    LineComment,
    /// Nesting depth of `/* */` comments.
    BlockComment(u32),
    DollarQuoted(String),
}

/// Split SQL into statements on `;`.
///
/// Semicolons inside string literals, quoted identifiers, comments and
/// dollar-quoted bodies do not end a statement. Fragments that contain only
/// comments are dropped.
pub(crate) fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = Lexer::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let peeked = chars.peek().copied();

        let next = match &state {
            Lexer::Code => match c {
                '-' if peeked == Some('-') => {
                    chars.next();
                    current.push('-');
                    Some(Lexer::LineComment)
                }
                '/' if peeked == Some('*') => {
                    chars.next();
                    current.push('*');
                    Some(Lexer::BlockComment(1))
                }
                ';' => {
                    push_statement(&mut statements, &mut current, has_code);
                    has_code = false;
                    None
                }
                c if c.is_whitespace() => None,
                c => {
                    has_code = true;
                    match c {
                        '\'' => Some(Lexer::SingleQuoted {
                            escapes: opens_escape_string(&current),
                        }),
                        '"' => Some(Lexer::DoubleQuoted),
                        '$' => read_dollar_tag(&mut chars, &mut current).map(Lexer::DollarQuoted),
                        _ => None,
                    }
                }
            },
            Lexer::SingleQuoted { escapes: true } if c == '\\' => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
                None
            }
            // A doubled quote closes and immediately reopens, which is equivalent.
            Lexer::SingleQuoted { .. } if c == '\'' => Some(Lexer::Code),
            Lexer::DoubleQuoted if c == '"' => Some(Lexer::Code),
            Lexer::LineComment if c == '\n' => Some(Lexer::Code),
            Lexer::BlockComment(depth) if c == '*' && peeked == Some('/') => {
                chars.next();
                current.push('/');
                Some(match depth - 1 {
                    0 => Lexer::Code,
                    d => Lexer::BlockComment(d),
                })
            }
            Lexer::BlockComment(depth) if c == '/' && peeked == Some('*') => {
                chars.next();
                current.push('*');
                Some(Lexer::BlockComment(depth + 1))
            }
            Lexer::DollarQuoted(open) if c == '$' => {
                let close = read_dollar_tag(&mut chars, &mut current);
                (close.as_deref() == Some(open.as_str())).then_some(Lexer::Code)
            }
            _ => None,
        };

        if let Some(next) = next {
            state = next;
        }
    }

    push_statement(&mut statements, &mut current, has_code);
    statements
}

/// Whether the quote just pushed onto `current` opens an `E'...'` literal.
fn opens_escape_string(current: &str) -> bool {
    let mut before = current.chars().rev().skip(1);
    match (before.next(), before.next()) {
        (Some('E' | 'e'), None) => true,
        (Some('E' | 'e'), Some(p)) => !(p.is_alphanumeric() || p == '_'),
        _ => false,
    }
}

/// Consume the rest of a `$tag$` delimiter whose leading `$` was already read.
///
/// Returns the full delimiter (e.g. `$$` or `$body$`), or `None` when the
/// characters do not form one (such as a `$1` placeholder).
fn read_dollar_tag(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    current: &mut String,
) -> Option<String> {
    let mut tag = String::from("$");
    while let Some(&next) = chars.peek() {
        if next == '$' {
            chars.next();
            current.push('$');
            tag.push('$');
            return Some(tag);
        }
        if next.is_alphanumeric() || next == '_' {
            chars.next();
            current.push(next);
            tag.push(next);
        } else {
            return None;
        }
    }
    None
}

fn push_statement(statements: &mut Vec<String>, current: &mut String, has_code: bool) {
    if has_code {
        let stmt = current.trim().trim_end_matches(';').trim();
        statements.push(stmt.to_string());
    }
    current.clear();
}
