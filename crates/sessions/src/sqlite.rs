//! SQLite-backed session store.
//!
//! One row per session key in `session_blob`, upserted on every save.

use std::time::{SystemTime, UNIX_EPOCH};

use {async_trait::async_trait, sqlx::SqlitePool, tokio_util::sync::CancellationToken};

use crate::{
    error::Result,
    store::{SessionStore, cancellable},
};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url` (e.g. `sqlite://courier.db?mode=rwc`) and create
    /// the table if needed.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(url).await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the `session_blob` table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS session_blob (
                session_key TEXT PRIMARY KEY NOT NULL,
                value       BLOB NOT NULL,
                updated_at  INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, cancel: &CancellationToken, key: &str) -> Result<Option<Vec<u8>>> {
        cancellable(cancel, async {
            let row = sqlx::query_scalar::<_, Vec<u8>>(
                "SELECT value FROM session_blob WHERE session_key = ?",
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await
    }

    async fn set(&self, cancel: &CancellationToken, key: &str, value: &[u8]) -> Result<()> {
        cancellable(cancel, async {
            sqlx::query(
                r#"INSERT INTO session_blob (session_key, value, updated_at)
                   VALUES (?, ?, ?)
                   ON CONFLICT(session_key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at"#,
            )
            .bind(key)
            .bind(value)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()> {
        cancellable(cancel, async {
            sqlx::query("DELETE FROM session_blob WHERE session_key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::error::Error, sqlx::sqlite::SqlitePoolOptions};

    async fn test_store() -> SqliteStore {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn set_and_get() {
        let store = test_store().await;
        let cancel = CancellationToken::new();

        store.set(&cancel, "chat:1", b"{\"n\":1}").await.unwrap();
        let val = store.get(&cancel, "chat:1").await.unwrap();
        assert_eq!(val.as_deref(), Some(&b"{\"n\":1}"[..]));
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = test_store().await;
        let val = store
            .get(&CancellationToken::new(), "missing")
            .await
            .unwrap();
        assert!(val.is_none());
    }

    #[tokio::test]
    async fn set_overwrites() {
        let store = test_store().await;
        let cancel = CancellationToken::new();

        store.set(&cancel, "k", b"v1").await.unwrap();
        store.set(&cancel, "k", b"v2").await.unwrap();
        let val = store.get(&cancel, "k").await.unwrap();
        assert_eq!(val.as_deref(), Some(&b"v2"[..]));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let store = test_store().await;
        let cancel = CancellationToken::new();

        store.set(&cancel, "k", b"v").await.unwrap();
        store.delete(&cancel, "k").await.unwrap();
        assert!(store.get(&cancel, "k").await.unwrap().is_none());
        store.delete(&cancel, "k").await.unwrap();
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let store = test_store().await;
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_call_fails() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            store.set(&cancel, "k", b"v").await,
            Err(Error::Cancelled)
        ));
    }
}
