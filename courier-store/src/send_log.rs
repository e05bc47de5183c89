//! Send log: one row per successful send, feeding the sliding-window
//! rate counters.

use sqlx::Row;

use crate::{error::Result, store::Store};

impl Store {
    /// Append a send-log row.
    pub async fn log_send(&self, account_id: &str, ts: i64) -> Result<()> {
        sqlx::query("INSERT INTO send_log (account_id, ts) VALUES (?1, ?2)")
            .bind(account_id)
            .bind(ts)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of sends logged for an account since `epoch` (inclusive).
    pub async fn count_sends_since(&self, account_id: &str, epoch: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS sends FROM send_log WHERE account_id = ?1 AND ts >= ?2",
        )
        .bind(account_id)
        .bind(epoch)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("sends")?)
    }

    /// Drop send-log rows older than `epoch`; they can no longer affect any
    /// configured window.
    pub async fn prune_send_log_before(&self, epoch: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM send_log WHERE ts < ?1")
            .bind(epoch)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
