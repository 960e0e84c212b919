//! Database layer for the local SQLite cache.
//!
//! Handles connection pool management with WAL mode, schema migrations, the
//! settings key-value store, and the missing-table self-heal check that sync
//! engines run before touching the cache.

pub mod pool;
pub mod settings;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tables the sync engines require to exist before any operation proceeds.
const REQUIRED_TABLES: &[&str] = &[
    "organizations",
    "person_org_connections",
    "users",
    "user_meta",
    "settings",
    "sync_log",
];

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Get the path to the SQLite cache file inside a data directory.
pub fn get_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("orgsync.db")
}

/// Initialize the database: create the file if needed and run migrations.
///
/// Safe to invoke repeatedly; migrations are recorded in a `_migrations`
/// table and applied at most once.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
///
/// # Returns
/// A connection pool configured with WAL mode
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Migration(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = pool::create_pool(db_path).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Check whether all cache tables exist.
///
/// Absence is a recoverable precondition (e.g. the cache file was wiped by
/// an administrator), handled by [`ensure_schema`].
pub async fn tables_exist(pool: &pool::DbPool) -> Result<bool, DbError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(pool)
    .await?;

    let present: std::collections::HashSet<&str> =
        rows.iter().map(|(name,)| name.as_str()).collect();

    Ok(REQUIRED_TABLES.iter().all(|t| present.contains(t)))
}

/// Recreate missing cache tables before a sync operation proceeds.
///
/// The schema statements all use `IF NOT EXISTS`, so re-applying them over a
/// partially present schema only fills the gaps. Called by every sync engine
/// entry point; a no-op when the schema is intact.
pub async fn ensure_schema(pool: &pool::DbPool) -> Result<(), DbError> {
    if tables_exist(pool).await? {
        return Ok(());
    }

    log::warn!("cache tables missing, recreating schema");
    apply_schema(pool).await?;

    if !tables_exist(pool).await? {
        return Err(DbError::Migration(
            "schema recreation did not produce the required tables".to_string(),
        ));
    }

    Ok(())
}

/// Run all pending database migrations.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    let mut conn = pool.acquire().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    let applied: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM _migrations WHERE name = '0001_initial_schema'")
            .fetch_optional(&mut *conn)
            .await?;

    if applied.is_none() {
        apply_schema(pool).await?;

        sqlx::query("INSERT INTO _migrations (name) VALUES ('0001_initial_schema')")
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Apply the embedded schema file statement by statement.
async fn apply_schema(pool: &pool::DbPool) -> Result<(), DbError> {
    let schema_sql = include_str!("migrations/0001_initial_schema.sql");

    for statement in parse_sql_statements(schema_sql) {
        sqlx::query(&statement).execute(pool).await?;
    }

    Ok(())
}

/// Parse SQL statements from a migration file.
///
/// Handles comment lines, semicolons inside parentheses (e.g.
/// `strftime('%s', 'now')`), and multi-line statements.
fn parse_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current_statement = String::new();
    let mut paren_depth: i32 = 0;

    for line in sql.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("--") {
            continue;
        }

        let line_without_comment = if let Some(idx) = line.find("--") {
            &line[..idx]
        } else {
            line
        };

        for ch in line_without_comment.chars() {
            match ch {
                '(' => {
                    paren_depth += 1;
                    current_statement.push(ch);
                }
                ')' => {
                    paren_depth = paren_depth.saturating_sub(1);
                    current_statement.push(ch);
                }
                ';' if paren_depth == 0 => {
                    let stmt = current_statement.trim().to_string();
                    if !stmt.is_empty() {
                        statements.push(stmt);
                    }
                    current_statement.clear();
                }
                _ => {
                    current_statement.push(ch);
                }
            }
        }

        if !current_statement.is_empty() {
            current_statement.push(' ');
        }
    }

    let final_stmt = current_statement.trim().to_string();
    if !final_stmt.is_empty() {
        statements.push(final_stmt);
    }

    statements
}
