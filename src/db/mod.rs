//! Persistence gateway.
//!
//! This module owns all storage concerns:
//! - The gateway contract the assignment engine depends on (`gateway`)
//! - SQLite connection pool management with WAL mode
//! - Schema migrations
//! - SQLite and in-memory gateway implementations

pub mod gateway;
pub mod memory;
pub mod pool;
pub mod sqlite;

pub use gateway::{AtomicScope, Gateway};
pub use memory::InMemoryGateway;
pub use sqlite::SqliteGateway;

use std::path::Path;
use thiserror::Error;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}

/// Initialize the database: create the file if needed and run migrations.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
///
/// # Returns
/// A connection pool configured with WAL mode
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Migration(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = pool::create_pool(db_path).await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Embedded migrations, applied in order.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Apply every migration not yet recorded in `_migrations`.
///
/// Each migration runs in its own transaction together with its record.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for &(name, sql) in MIGRATIONS {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let applied: Option<i64> = sqlx::query_scalar("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        if applied.is_some() {
            continue;
        }

        sqlx::raw_sql(sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{} failed: {}", name, e)))?;
        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        log::info!("[db] Applied migration {}", name);
    }

    Ok(())
}
