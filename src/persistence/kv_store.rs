//! Shared keyed store with expiry, bounded lists and a notification channel.
//!
//! Values are JSON documents keyed by the shapes in [`super::keys`].
//! Expired entries are invisible to every read and are physically removed
//! by the retention task. Notifications are delivered in-process only;
//! other processes observe changes by polling.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{AppError, Result};

use super::db::Database;

/// Buffered notifications per subscriber before lagging ones drop messages.
const NOTIFY_CAPACITY: usize = 256;

/// Message broadcast on a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNotification {
    /// Channel name (for example `heartbeats`).
    pub channel: String,
    /// JSON payload.
    pub payload: String,
}

/// Keyed store backed by `SQLite`.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
    notify: broadcast::Sender<StoreNotification>,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| {
        let ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms().saturating_add(ms)
    })
}

impl KvStore {
    /// Wrap a connected database.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self { db, notify }
    }

    /// Read the raw JSON stored under `key`, ignoring expired entries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(self.db.as_ref())
        .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Read and deserialize the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure or `AppError::Store` if the
    /// stored JSON does not match `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_raw(key)
            .await?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(Into::into)
    }

    /// Store `value` under `key`, replacing any previous value and expiry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on serialization failure or `AppError::Db`
    /// if the write fails.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let json = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        )
        .bind(key)
        .bind(&json)
        .bind(expiry_ms(ttl))
        .execute(self.db.as_ref())
        .await?;

        debug!(key, "store set");
        Ok(())
    }

    /// Remove `key`. Returns whether a live entry was removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
        )
        .bind(key)
        .bind(now_ms())
        .execute(self.db.as_ref())
        .await?;

        // Expired leftovers go too, without counting as a removal.
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(self.db.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Every live entry whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure or `AppError::Store` on
    /// malformed JSON.
    pub async fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM kv
             WHERE substr(key, 1, length(?1)) = ?1
               AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY key",
        )
        .bind(prefix)
        .bind(now_ms())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter()
            .map(|(key, raw)| -> Result<(String, T)> { Ok((key, serde_json::from_str(&raw)?)) })
            .collect()
    }

    /// Append `value` to the list under `key`, keeping only the newest `cap`
    /// entries, and refresh the whole list's expiry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` on serialization failure or `AppError::Db`
    /// if the transaction fails.
    pub async fn push_capped<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        cap: usize,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let expires_at = expiry_ms(ttl);
        let cap = i64::try_from(cap).unwrap_or(i64::MAX);

        let mut tx = self.db.begin().await?;
        sqlx::query("INSERT INTO kv_list (key, value, expires_at) VALUES (?1, ?2, ?3)")
            .bind(key)
            .bind(&json)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM kv_list WHERE key = ?1 AND id NOT IN
             (SELECT id FROM kv_list WHERE key = ?1 ORDER BY id DESC LIMIT ?2)",
        )
        .bind(key)
        .bind(cap)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE kv_list SET expires_at = ?2 WHERE key = ?1")
            .bind(key)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Live list entries under `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` on query failure or `AppError::Store` on
    /// malformed JSON.
    pub async fn list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT value FROM kv_list
             WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY id",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter()
            .map(|(raw,)| serde_json::from_str::<T>(&raw).map_err(AppError::from))
            .collect()
    }

    /// Broadcast `payload` to in-process subscribers of `channel`.
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, channel: &str, payload: String) {
        let _ = self.notify.send(StoreNotification {
            channel: channel.to_owned(),
            payload,
        });
    }

    /// Subscribe to every notification published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreNotification> {
        self.notify.subscribe()
    }

    /// Physically delete expired entries. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a delete fails.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = now_ms();
        let scalars = sqlx::query("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(now)
            .execute(self.db.as_ref())
            .await?;
        let lists =
            sqlx::query("DELETE FROM kv_list WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .bind(now)
                .execute(self.db.as_ref())
                .await?;

        Ok(scalars.rows_affected() + lists.rows_affected())
    }
}
