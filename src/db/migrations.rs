//! Connection setup and versioned schema application.
//!
//! The schema version lives in SQLite's `user_version` header field. A fresh
//! file is at version 0; `init_db` applies `schema.sql` and stamps
//! [`SCHEMA_VERSION`] in one transaction. A file stamped with a newer version
//! was written by a newer build and is refused rather than reinterpreted.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Version stamped into `user_version` after `schema.sql` is applied.
pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("database schema version {found} is newer than supported version {supported}")]
    NewerSchema { found: i64, supported: i64 },
}

/// Open (creating if needed) the index database and bring its schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, MigrationError> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let applied = run_migrations(&pool).await?;
    info!(path = db_path, applied, version = SCHEMA_VERSION, "index database ready");
    Ok(pool)
}

async fn schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Apply `schema.sql` when the file is behind [`SCHEMA_VERSION`]. Returns whether
/// anything was applied.
async fn run_migrations(pool: &SqlitePool) -> Result<bool, MigrationError> {
    let found = schema_version(pool).await?;
    if found > SCHEMA_VERSION {
        return Err(MigrationError::NewerSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }
    if found == SCHEMA_VERSION {
        debug!(version = found, "schema up to date");
        return Ok(false);
    }

    info!(from = found, to = SCHEMA_VERSION, "applying schema");
    let mut tx = pool.begin().await?;
    for statement in include_str!("schema.sql").split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(&mut *tx).await?;
        }
    }
    // PRAGMA arguments cannot be bound.
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}
