//! Versioned schema migrations.
//!
//! Migrations run once at startup, tracked through SQLite's `user_version`
//! pragma. The store never alters schema at tick granularity.

use sqlx::SqlitePool;

use crate::error::{Result, StoreError};

/// Ordered migration batches. `user_version` records how many have run.
const MIGRATIONS: &[&str] = &[
    // v1: initial schema
    r#"
    CREATE TABLE IF NOT EXISTS tenants (
        id              TEXT PRIMARY KEY,
        name            TEXT NOT NULL DEFAULT '',
        active          INTEGER NOT NULL DEFAULT 1,
        client_base_url TEXT,
        client_sync_path TEXT,
        client_auth     TEXT NOT NULL DEFAULT '{"method":"none"}'
    );

    CREATE TABLE IF NOT EXISTS accounts (
        pk              INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id       TEXT NOT NULL REFERENCES tenants(id) ON DELETE RESTRICT,
        id              TEXT NOT NULL,
        host            TEXT NOT NULL,
        port            INTEGER NOT NULL,
        user            TEXT,
        password        TEXT,
        use_tls         INTEGER NOT NULL DEFAULT 1,
        ttl_seconds     INTEGER NOT NULL DEFAULT 300,
        batch_size      INTEGER,
        limit_per_minute INTEGER,
        limit_per_hour  INTEGER,
        limit_per_day   INTEGER,
        limit_behavior  TEXT NOT NULL DEFAULT 'defer',
        UNIQUE (tenant_id, id)
    );

    CREATE TABLE IF NOT EXISTS messages (
        pk              TEXT PRIMARY KEY,
        tenant_id       TEXT NOT NULL REFERENCES tenants(id) ON DELETE RESTRICT,
        account_id      TEXT NOT NULL,
        id              TEXT NOT NULL,
        priority        INTEGER NOT NULL DEFAULT 2,
        payload         TEXT NOT NULL,
        batch_code      TEXT,
        created_at      INTEGER NOT NULL,
        deferred_ts     INTEGER,
        smtp_ts         INTEGER,
        UNIQUE (tenant_id, id)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_ready
        ON messages (smtp_ts, deferred_ts, priority, created_at);

    CREATE TABLE IF NOT EXISTS message_events (
        event_id        INTEGER PRIMARY KEY AUTOINCREMENT,
        message_pk      TEXT NOT NULL REFERENCES messages(pk) ON DELETE CASCADE,
        event_type      TEXT NOT NULL,
        event_ts        INTEGER NOT NULL,
        description     TEXT,
        metadata        TEXT,
        reported_ts     INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_events_message ON message_events (message_pk);
    CREATE INDEX IF NOT EXISTS idx_events_unreported
        ON message_events (event_id) WHERE reported_ts IS NULL;

    CREATE TABLE IF NOT EXISTS send_log (
        account_id      TEXT NOT NULL,
        ts              INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_send_log ON send_log (account_id, ts);
    "#,
];

/// Apply any migrations newer than the database's `user_version`.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    let applied = usize::try_from(version)
        .map_err(|_| StoreError::Migration(format!("bad user_version {version}")))?;

    if applied > MIGRATIONS.len() {
        return Err(StoreError::Migration(format!(
            "database schema version {applied} is newer than this build ({})",
            MIGRATIONS.len()
        )));
    }

    for (index, batch) in MIGRATIONS.iter().enumerate().skip(applied) {
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(batch).execute(&mut *tx).await?;
        sqlx::raw_sql(&format!("PRAGMA user_version = {}", index + 1))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(version = index + 1, "applied schema migration");
    }

    Ok(())
}
