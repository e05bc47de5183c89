//! Append-only message event log.
//!
//! Events are the authoritative record of everything that happened to a
//! message: the dispatcher's terminal outcome and deferrals, plus externally
//! ingested bounce and PEC receipts. Reporting works off this log alone.

use serde::{Deserialize, Serialize};
use sqlx::{Row, sqlite::SqliteRow};

use crate::{
    error::{Result, StoreError},
    store::Store,
};

/// Kind of a message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Sent,
    Error,
    Deferred,
    Bounce,
    PecAcceptance,
    PecDelivery,
    PecFailure,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Error => "error",
            Self::Deferred => "deferred",
            Self::Bounce => "bounce",
            Self::PecAcceptance => "pec_acceptance",
            Self::PecDelivery => "pec_delivery",
            Self::PecFailure => "pec_failure",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "sent" => Ok(Self::Sent),
            "error" => Ok(Self::Error),
            "deferred" => Ok(Self::Deferred),
            "bounce" => Ok(Self::Bounce),
            "pec_acceptance" => Ok(Self::PecAcceptance),
            "pec_delivery" => Ok(Self::PecDelivery),
            "pec_failure" => Ok(Self::PecFailure),
            other => Err(StoreError::NotFound(format!("unknown event type '{other}'"))),
        }
    }
}

/// One row of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub event_id: i64,
    pub message_pk: String,
    pub event_type: EventType,
    pub event_ts: i64,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub reported_ts: Option<i64>,
}

/// An unreported event joined with routing context for the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreportedEvent {
    pub event_id: i64,
    pub message_pk: String,
    /// Client-facing message id, the one tenants know.
    pub message_id: String,
    pub tenant_id: String,
    pub account_id: String,
    pub event_type: EventType,
    pub event_ts: i64,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

fn event_from_row(row: &SqliteRow) -> Result<MessageEvent> {
    let event_type: String = row.try_get("event_type")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(MessageEvent {
        event_id: row.try_get("event_id")?,
        message_pk: row.try_get("message_pk")?,
        event_type: EventType::parse(&event_type)?,
        event_ts: row.try_get("event_ts")?,
        description: row.try_get("description")?,
        metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
        reported_ts: row.try_get("reported_ts")?,
    })
}

impl Store {
    /// Append an event for a message.
    ///
    /// Dispatch types (`sent`/`error`/`deferred`) also apply their message
    /// state side effect in the same transaction; receipt types never touch
    /// message state.
    pub async fn add_event(
        &self,
        pk: &str,
        event_type: EventType,
        ts: i64,
        description: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let event_id = self
            .append_event_tx(&mut tx, pk, event_type, ts, description, metadata)
            .await?;
        tx.commit().await?;
        Ok(event_id)
    }

    /// All events of one message, oldest first.
    pub async fn list_events(&self, pk: &str) -> Result<Vec<MessageEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM message_events WHERE message_pk = ?1 ORDER BY event_id",
        )
        .bind(pk)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    /// Unreported events joined with tenant/account routing context,
    /// oldest first.
    pub async fn fetch_unreported(&self, limit: u32) -> Result<Vec<UnreportedEvent>> {
        let rows = sqlx::query(
            r"
            SELECT
                e.event_id, e.message_pk, e.event_type, e.event_ts,
                e.description, e.metadata,
                m.id AS message_id, m.tenant_id, m.account_id
            FROM message_events e
            JOIN messages m ON m.pk = e.message_pk
            WHERE e.reported_ts IS NULL
            ORDER BY e.event_id
            LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let event_type: String = row.try_get("event_type")?;
                let metadata: Option<String> = row.try_get("metadata")?;
                Ok(UnreportedEvent {
                    event_id: row.try_get("event_id")?,
                    message_pk: row.try_get("message_pk")?,
                    message_id: row.try_get("message_id")?,
                    tenant_id: row.try_get("tenant_id")?,
                    account_id: row.try_get("account_id")?,
                    event_type: EventType::parse(&event_type)?,
                    event_ts: row.try_get("event_ts")?,
                    description: row.try_get("description")?,
                    metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
                })
            })
            .collect()
    }

    /// Mark events as acknowledged by the tenant.
    pub async fn mark_events_reported(&self, ids: &[i64], ts: i64) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let placeholders = (0..ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE message_events SET reported_ts = ?1 WHERE event_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(ts);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}
