//! `SQLite` schema for the shared keyed store.
//!
//! Every process that opens the store runs the bootstrap; statements are
//! idempotent.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the keyed-store tables to the connected `SQLite` database.
///
/// `kv` holds scalar keys; `kv_list` holds append-only bounded lists.
/// `expires_at` is unix milliseconds, `NULL` meaning no expiry.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS kv (
    key         TEXT PRIMARY KEY NOT NULL,
    value       TEXT NOT NULL,
    expires_at  INTEGER
);

CREATE TABLE IF NOT EXISTS kv_list (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    expires_at  INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);
CREATE INDEX IF NOT EXISTS idx_kv_list_key ON kv_list(key, id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
