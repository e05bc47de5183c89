//! Store handle and connection management.

use std::{str::FromStr, sync::Arc};

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::{
    error::Result,
    secrets::{PlaintextSecrets, SecretsProvider},
};

/// Handle to the relay's durable state.
///
/// Cheap to clone; all tasks share one connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
    pub(crate) secrets: Arc<dyn SecretsProvider>,
}

/// Aggregate queue counters surfaced through the status command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    /// Messages with no processed timestamp and no future deferral.
    pub pending: i64,
    /// Messages deferred into the future.
    pub deferred: i64,
    /// Messages with a terminal outcome.
    pub processed: i64,
}

impl Store {
    /// Open (creating if missing) a database file and run migrations.
    pub async fn open(path: &str, secrets: Arc<dyn SecretsProvider>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool, secrets };
        crate::schema::migrate(&store.pool).await?;
        Ok(store)
    }

    /// Open an in-memory database, mainly for tests.
    ///
    /// A single connection keeps every query on the same in-memory database.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            secrets: Arc::new(PlaintextSecrets),
        };
        crate::schema::migrate(&store.pool).await?;
        Ok(store)
    }

    /// Swap the secrets provider (builder style).
    #[must_use]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretsProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Queue counters at `now`.
    pub async fn queue_counts(&self, now: i64) -> Result<QueueCounts> {
        let row = sqlx::query(
            r"
            SELECT
                SUM(CASE WHEN smtp_ts IS NULL
                         AND (deferred_ts IS NULL OR deferred_ts <= ?1)
                    THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN smtp_ts IS NULL AND deferred_ts > ?1
                    THEN 1 ELSE 0 END) AS deferred,
                SUM(CASE WHEN smtp_ts IS NOT NULL THEN 1 ELSE 0 END) AS processed
            FROM messages
            ",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueCounts {
            pending: row.try_get::<Option<i64>, _>("pending")?.unwrap_or(0),
            deferred: row.try_get::<Option<i64>, _>("deferred")?.unwrap_or(0),
            processed: row.try_get::<Option<i64>, _>("processed")?.unwrap_or(0),
        })
    }

    /// Wait for outstanding writes and close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Short unique identifier for message rows.
pub(crate) fn short_uuid() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    simple[..22].to_string()
}
