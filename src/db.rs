use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use crate::error::RecoveryError;

fn unavailable(path: &Path, reason: impl ToString) -> RecoveryError {
    RecoveryError::DatabaseUnavailable {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Open a device database without any chance of writing to it.
///
/// Fails when the file is missing, is not SQLite, or has no `Files` table.
pub async fn open_readonly(path: &Path) -> Result<SqlitePool, RecoveryError> {
    if !path.is_file() {
        return Err(unavailable(path, "file does not exist"));
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .map_err(|e| unavailable(path, e))?
        .read_only(true)
        .create_if_missing(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .map_err(|e| unavailable(path, e))?;

    let tables = list_tables(&pool).await.map_err(|e| unavailable(path, e))?;
    if !tables.contains("Files") {
        pool.close().await;
        return Err(unavailable(path, "no Files table"));
    }

    Ok(pool)
}

/// Names of all tables in the database. This is also the first query run
/// against a freshly opened file, so it doubles as the "is this SQLite" check.
pub async fn list_tables(pool: &SqlitePool) -> sqlx::Result<HashSet<String>> {
    let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
}

pub async fn table_columns(pool: &SqlitePool, table: &str) -> sqlx::Result<HashSet<String>> {
    let rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", table))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
}
