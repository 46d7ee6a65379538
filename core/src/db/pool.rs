//! SQLite-backed secret store

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::db::SecretStore;
use crate::error::CoreResult;

/// Secret store backed by a single `secrets` table
#[derive(Debug, Clone)]
pub struct SqliteSecretStore {
    db: SqlitePool,
}

impl SqliteSecretStore {
    /// Open (creating if needed) the database file at `db_path`
    pub async fn open(db_path: &str) -> CoreResult<Self> {
        // WAL for concurrent readers, NORMAL sync is durable enough with WAL
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let db = SqlitePoolOptions::new().connect_with(options).await?;

        tracing::info!("Secret store initialized with WAL mode at: {}", db_path);
        Self::from_pool(db).await
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> CoreResult<Self> {
        // A single connection, otherwise every pooled connection gets its own database
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(db).await
    }

    /// Wrap an existing pool, creating the table if missing
    pub async fn from_pool(db: SqlitePool) -> CoreResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db })
    }
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let result = sqlx::query(r#"SELECT value FROM secrets WHERE key = ?"#)
            .bind(key)
            .fetch_optional(&self.db)
            .await?;

        Ok(result.map(|row| row.get::<Vec<u8>, _>("value")))
    }

    async fn set(&self, key: &str, value: &[u8]) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO secrets (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM secrets WHERE key = ?"#)
            .bind(key)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = SqliteSecretStore::in_memory().await.unwrap();

        assert_eq!(store.get("device_keys").await.unwrap(), None);

        store.set("device_keys", b"{\"a\":1}").await.unwrap();
        assert_eq!(
            store.get("device_keys").await.unwrap(),
            Some(b"{\"a\":1}".to_vec())
        );

        // Overwrite replaces the whole value
        store.set("device_keys", b"{}").await.unwrap();
        assert_eq!(store.get("device_keys").await.unwrap(), Some(b"{}".to_vec()));

        store.delete("device_keys").await.unwrap();
        assert_eq!(store.get("device_keys").await.unwrap(), None);

        // Deleting twice is fine
        store.delete("device_keys").await.unwrap();
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.db");
        let path = path.to_string_lossy().to_string();

        {
            let store = SqliteSecretStore::open(&path).await.unwrap();
            store.set("session_c1", b"state").await.unwrap();
        }

        let reopened = SqliteSecretStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("session_c1").await.unwrap(),
            Some(b"state".to_vec())
        );
    }
}
