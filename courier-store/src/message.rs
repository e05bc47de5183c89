//! Messages: one unit of outbound mail and its queue lifecycle.
//!
//! A message moves `pending -> (deferred -> pending)* -> sent | error`. The
//! transition writes live here; each one appends the describing event and
//! updates the materialized columns in a single transaction.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Row, Sqlite, Transaction, sqlite::SqliteRow};

use crate::{
    account::{Account, LimitBehavior},
    error::Result,
    event::EventType,
    store::{Store, short_uuid},
};

/// How an attachment's content is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Content inlined in the storage path after a `base64:` prefix.
    Base64,
    /// Absolute path on the local filesystem.
    Filesystem,
    /// Direct `http(s)://` URL, fetched with GET.
    HttpUrl,
    /// Tenant-side endpoint resolving a storage path, fetched with POST.
    HttpEndpoint,
}

impl FetchMode {
    /// Infer the mode from the storage path prefix.
    #[must_use]
    pub fn infer(storage_path: &str) -> Self {
        if storage_path.starts_with("base64:") {
            Self::Base64
        } else if storage_path.starts_with("http://") || storage_path.starts_with("https://") {
            Self::HttpUrl
        } else if storage_path.starts_with('/') {
            Self::Filesystem
        } else {
            Self::HttpEndpoint
        }
    }
}

/// One attachment reference inside a message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub storage_path: String,
    #[serde(default)]
    pub fetch_mode: Option<FetchMode>,
    #[serde(default)]
    pub content_md5: Option<String>,
}

impl Attachment {
    /// Effective fetch mode: explicit, or inferred from the storage path.
    #[must_use]
    pub fn mode(&self) -> FetchMode {
        self.fetch_mode
            .unwrap_or_else(|| FetchMode::infer(&self.storage_path))
    }

    /// Filename with any `{MD5:<hex>}` cache marker stripped.
    #[must_use]
    pub fn clean_filename(&self) -> String {
        strip_md5_marker(&self.filename).0
    }

    /// Cache key: explicit `content_md5`, else the filename marker.
    #[must_use]
    pub fn cache_key(&self) -> Option<String> {
        self.content_md5
            .clone()
            .or_else(|| strip_md5_marker(&self.filename).1)
    }
}

/// Split `name{MD5:<hex>}.ext` into the clean name and the marker value.
fn strip_md5_marker(filename: &str) -> (String, Option<String>) {
    let Some(start) = filename.find("{MD5:") else {
        return (filename.to_string(), None);
    };
    let Some(rel_end) = filename[start..].find('}') else {
        return (filename.to_string(), None);
    };
    let end = start + rel_end;
    let marker = filename[start + 5..end].to_string();
    let mut clean = String::with_capacity(filename.len());
    clean.push_str(&filename[..start]);
    clean.push_str(&filename[end + 1..]);
    (clean, Some(marker))
}

/// The opaque mail envelope carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub from: String,
    #[serde(deserialize_with = "string_or_seq")]
    pub to: Vec<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub cc: Vec<String>,
    #[serde(default, deserialize_with = "string_or_seq")]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Optional grouping code, used by suspend/activate commands.
    #[serde(default)]
    pub batch_code: Option<String>,
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

/// Accept both `"to": "a@x"` and `"to": ["a@x", "b@x"]`.
fn string_or_seq<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// A message submitted for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    /// Client-facing identifier, unique per tenant.
    pub id: String,
    pub tenant_id: String,
    pub account_id: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub payload: MessagePayload,
}

const fn default_priority() -> u8 {
    2
}

/// Identifier pair returned for each accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertedMessage {
    pub id: String,
    pub pk: String,
}

/// A ready message joined with the account it dispatches through.
#[derive(Debug, Clone)]
pub struct ReadyMessage {
    pub pk: String,
    pub id: String,
    pub tenant_id: String,
    pub account_id: String,
    pub priority: u8,
    pub payload: MessagePayload,
    pub batch_code: Option<String>,
    pub created_at: i64,
    /// Number of deferrals so far; drives the retry ladder.
    pub attempts: u32,
    pub account: Account,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ready_from_row(row: &SqliteRow, store: &Store) -> Result<ReadyMessage> {
    let payload_json: String = row.try_get("payload")?;
    let password: Option<String> = row.try_get("a_password")?;
    let password = password
        .map(|sealed| store.secrets.open(&sealed))
        .transpose()?;
    let limit_behavior: String = row.try_get("a_limit_behavior")?;
    let to_u32 = |value: Option<i64>| value.map(|v| v.max(0).min(i64::from(u32::MAX)) as u32);

    let tenant_id: String = row.try_get("tenant_id")?;
    let account_id: String = row.try_get("account_id")?;

    let account = Account {
        tenant_id: tenant_id.clone(),
        id: account_id.clone(),
        host: row.try_get("a_host")?,
        port: row.try_get::<i64, _>("a_port")?.clamp(0, i64::from(u16::MAX)) as u16,
        user: row.try_get("a_user")?,
        password,
        use_tls: row.try_get::<i64, _>("a_use_tls")? != 0,
        ttl_seconds: to_u32(row.try_get("a_ttl_seconds")?).unwrap_or(300),
        batch_size: to_u32(row.try_get("a_batch_size")?),
        limit_per_minute: to_u32(row.try_get("a_limit_per_minute")?),
        limit_per_hour: to_u32(row.try_get("a_limit_per_hour")?),
        limit_per_day: to_u32(row.try_get("a_limit_per_day")?),
        limit_behavior: match limit_behavior.as_str() {
            "reject" => LimitBehavior::Reject,
            _ => LimitBehavior::Defer,
        },
    };

    Ok(ReadyMessage {
        pk: row.try_get("pk")?,
        id: row.try_get("id")?,
        tenant_id,
        account_id,
        priority: row.try_get::<i64, _>("priority")?.clamp(0, 3) as u8,
        payload: serde_json::from_str(&payload_json)?,
        batch_code: row.try_get("batch_code")?,
        created_at: row.try_get("created_at")?,
        attempts: to_u32(row.try_get("attempts")?).unwrap_or(0),
        account,
    })
}

impl Store {
    /// Upsert a batch of messages by `(tenant_id, id)`.
    ///
    /// Rows whose prior version already carries a processed timestamp are
    /// preserved untouched and excluded from the result, so re-submitting a
    /// batch can never cause a second delivery.
    pub async fn insert_messages(
        &self,
        batch: &[NewMessage],
        now: i64,
    ) -> Result<Vec<InsertedMessage>> {
        let mut tx = self.pool.begin().await?;
        let mut accepted = Vec::with_capacity(batch.len());

        for message in batch {
            let payload_json = serde_json::to_string(&message.payload)?;
            let batch_code = message.payload.batch_code.as_deref();

            let existing = sqlx::query(
                "SELECT pk, smtp_ts FROM messages WHERE tenant_id = ?1 AND id = ?2",
            )
            .bind(&message.tenant_id)
            .bind(&message.id)
            .fetch_optional(&mut *tx)
            .await?;

            let pk = match existing {
                Some(row) => {
                    let smtp_ts: Option<i64> = row.try_get("smtp_ts")?;
                    if smtp_ts.is_some() {
                        // Already processed: duplicate suppression.
                        continue;
                    }
                    let pk: String = row.try_get("pk")?;
                    sqlx::query(
                        r"
                        UPDATE messages
                        SET account_id = ?1, priority = ?2, payload = ?3, batch_code = ?4
                        WHERE pk = ?5
                        ",
                    )
                    .bind(&message.account_id)
                    .bind(i64::from(message.priority))
                    .bind(&payload_json)
                    .bind(batch_code)
                    .bind(&pk)
                    .execute(&mut *tx)
                    .await?;
                    pk
                }
                None => {
                    let pk = short_uuid();
                    sqlx::query(
                        r"
                        INSERT INTO messages
                            (pk, tenant_id, account_id, id, priority, payload, batch_code, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                        ",
                    )
                    .bind(&pk)
                    .bind(&message.tenant_id)
                    .bind(&message.account_id)
                    .bind(&message.id)
                    .bind(i64::from(message.priority))
                    .bind(&payload_json)
                    .bind(batch_code)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    pk
                }
            };

            accepted.push(InsertedMessage {
                id: message.id.clone(),
                pk,
            });
        }

        tx.commit().await?;
        Ok(accepted)
    }

    /// Messages ready for dispatch at `now`, joined with their account.
    ///
    /// The join constrains both `account_id` and `tenant_id`; accounts with
    /// the same id under different tenants must never multiply rows.
    pub async fn fetch_ready(&self, limit: u32, now: i64) -> Result<Vec<ReadyMessage>> {
        self.fetch_ready_filtered(limit, now, None, None).await
    }

    /// `fetch_ready` with priority filters: `priority` selects one exact
    /// class, `min_priority` everything at or below that urgency
    /// (numerically `>=`).
    pub async fn fetch_ready_filtered(
        &self,
        limit: u32,
        now: i64,
        priority: Option<u8>,
        min_priority: Option<u8>,
    ) -> Result<Vec<ReadyMessage>> {
        let rows = sqlx::query(
            r"
            SELECT
                m.pk, m.id, m.tenant_id, m.account_id, m.priority, m.payload,
                m.batch_code, m.created_at,
                (SELECT COUNT(*) FROM message_events e
                 WHERE e.message_pk = m.pk AND e.event_type = 'deferred') AS attempts,
                a.host AS a_host, a.port AS a_port, a.user AS a_user,
                a.password AS a_password, a.use_tls AS a_use_tls,
                a.ttl_seconds AS a_ttl_seconds, a.batch_size AS a_batch_size,
                a.limit_per_minute AS a_limit_per_minute,
                a.limit_per_hour AS a_limit_per_hour,
                a.limit_per_day AS a_limit_per_day,
                a.limit_behavior AS a_limit_behavior
            FROM messages m
            JOIN accounts a ON a.tenant_id = m.tenant_id AND a.id = m.account_id
            WHERE m.smtp_ts IS NULL
              AND (m.deferred_ts IS NULL OR m.deferred_ts <= ?1)
              AND (?3 IS NULL OR m.priority = ?3)
              AND (?4 IS NULL OR m.priority >= ?4)
            ORDER BY m.priority ASC, m.created_at ASC, m.pk ASC
            LIMIT ?2
            ",
        )
        .bind(now)
        .bind(i64::from(limit))
        .bind(priority.map(i64::from))
        .bind(min_priority.map(i64::from))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| ready_from_row(r, self)).collect()
    }

    /// Record the terminal `sent` outcome.
    pub async fn mark_sent(&self, pk: &str, ts: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.append_event_tx(&mut tx, pk, EventType::Sent, ts, None, None)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record the terminal `sent` outcome and the send-log row that feeds the
    /// rate counters, atomically.
    pub async fn record_sent(&self, pk: &str, account_id: &str, ts: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.append_event_tx(&mut tx, pk, EventType::Sent, ts, None, None)
            .await?;
        sqlx::query("INSERT INTO send_log (account_id, ts) VALUES (?1, ?2)")
            .bind(account_id)
            .bind(ts)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record the terminal `error` outcome.
    pub async fn mark_error(&self, pk: &str, ts: i64, description: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.append_event_tx(&mut tx, pk, EventType::Error, ts, Some(description), None)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Defer a message until `until_ts` and record the deferral.
    pub async fn set_deferred(
        &self,
        pk: &str,
        ts: i64,
        until_ts: i64,
        reason: Option<&str>,
    ) -> Result<()> {
        let metadata = serde_json::json!({ "deferred_ts": until_ts });
        let mut tx = self.pool.begin().await?;
        self.append_event_tx(&mut tx, pk, EventType::Deferred, ts, reason, Some(&metadata))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Latest message carrying the given client-facing id, for bounce
    /// correlation through the mail id header.
    pub async fn find_message_by_client_id(&self, id: &str) -> Result<Option<(String, String)>> {
        let row = sqlx::query(
            r"
            SELECT pk, tenant_id FROM messages
            WHERE id = ?1
            ORDER BY created_at DESC, pk DESC
            LIMIT 1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok::<_, crate::error::StoreError>((r.try_get("pk")?, r.try_get("tenant_id")?))
        })
        .transpose()
    }

    /// Retention sweep: delete processed messages whose every event has been
    /// reported at or before `ts`. Events cascade.
    pub async fn remove_fully_reported_before(&self, ts: i64) -> Result<u64> {
        let result = sqlx::query(
            r"
            DELETE FROM messages
            WHERE smtp_ts IS NOT NULL
              AND smtp_ts <= ?1
              AND NOT EXISTS (
                  SELECT 1 FROM message_events e
                  WHERE e.message_pk = messages.pk
                    AND (e.reported_ts IS NULL OR e.reported_ts > ?1)
              )
            ",
        )
        .bind(ts)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Append an event and apply its message-state side effect inside the
    /// caller's transaction. Dispatch event types are idempotent with the
    /// explicit `mark_*`/`set_deferred` calls: the processed timestamp is
    /// only ever set once.
    pub(crate) async fn append_event_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        pk: &str,
        event_type: EventType,
        ts: i64,
        description: Option<&str>,
        metadata: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let metadata_json = metadata.map(serde_json::Value::to_string);
        let result = sqlx::query(
            r"
            INSERT INTO message_events (message_pk, event_type, event_ts, description, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(pk)
        .bind(event_type.as_str())
        .bind(ts)
        .bind(description)
        .bind(metadata_json)
        .execute(&mut **tx)
        .await?;

        match event_type {
            EventType::Sent | EventType::Error => {
                sqlx::query(
                    "UPDATE messages SET smtp_ts = COALESCE(smtp_ts, ?1) WHERE pk = ?2",
                )
                .bind(ts)
                .bind(pk)
                .execute(&mut **tx)
                .await?;
            }
            EventType::Deferred => {
                let until = metadata
                    .and_then(|m| m.get("deferred_ts"))
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(ts);
                sqlx::query(
                    "UPDATE messages SET deferred_ts = ?1 WHERE pk = ?2 AND smtp_ts IS NULL",
                )
                .bind(until)
                .bind(pk)
                .execute(&mut **tx)
                .await?;
            }
            EventType::Bounce
            | EventType::PecAcceptance
            | EventType::PecDelivery
            | EventType::PecFailure => {}
        }

        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{account::Account, tenant::Tenant};

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        for tenant in ["t1", "t2"] {
            store
                .upsert_tenant(&Tenant {
                    id: tenant.to_string(),
                    name: String::new(),
                    active: true,
                    client_base_url: None,
                    client_sync_path: None,
                    client_auth: courier_common::ClientAuth::None,
                })
                .await
                .unwrap();
        }
        store
            .upsert_account(&Account::new("t1", "a1", "smtp.t1.com", 587))
            .await
            .unwrap();
        store
    }

    fn payload(to: &str) -> MessagePayload {
        MessagePayload {
            from: "s@e.com".to_string(),
            to: vec![to.to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: "Hi".to_string(),
            body: "x".to_string(),
            content_type: default_content_type(),
            headers: BTreeMap::new(),
            attachments: Vec::new(),
            batch_code: None,
        }
    }

    fn new_message(id: &str, priority: u8) -> NewMessage {
        NewMessage {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            account_id: "a1".to_string(),
            priority,
            payload: payload("r@e.com"),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_ready() {
        let store = seeded_store().await;
        let inserted = store
            .insert_messages(&[new_message("m1", 2)], 1000)
            .await
            .unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].id, "m1");

        let ready = store.fetch_ready(10, 1000).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "m1");
        assert_eq!(ready[0].account.host, "smtp.t1.com");
        assert_eq!(ready[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_priority_overrides_age() {
        let store = seeded_store().await;
        store
            .insert_messages(&[new_message("old-low", 3)], 1000)
            .await
            .unwrap();
        store
            .insert_messages(&[new_message("new-urgent", 0)], 2000)
            .await
            .unwrap();

        let ready = store.fetch_ready(10, 3000).await.unwrap();
        assert_eq!(ready[0].id, "new-urgent");
        assert_eq!(ready[1].id, "old-low");
    }

    #[tokio::test]
    async fn test_priority_filters() {
        let store = seeded_store().await;
        store
            .insert_messages(
                &[
                    new_message("immediate", 0),
                    new_message("high", 1),
                    new_message("normal", 2),
                    new_message("low", 3),
                ],
                1000,
            )
            .await
            .unwrap();

        let immediate = store
            .fetch_ready_filtered(10, 2000, Some(0), None)
            .await
            .unwrap();
        assert_eq!(immediate.len(), 1);
        assert_eq!(immediate[0].id, "immediate");

        let regular = store
            .fetch_ready_filtered(10, 2000, None, Some(1))
            .await
            .unwrap();
        let ids: Vec<&str> = regular.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "normal", "low"]);

        assert_eq!(store.fetch_ready(10, 2000).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_deferred_boundary_is_inclusive() {
        let store = seeded_store().await;
        let inserted = store
            .insert_messages(&[new_message("m1", 2)], 1000)
            .await
            .unwrap();
        store
            .set_deferred(&inserted[0].pk, 1000, 1020, Some("rate_limit"))
            .await
            .unwrap();

        assert!(store.fetch_ready(10, 1019).await.unwrap().is_empty());
        // deferred_ts == now is ready again
        assert_eq!(store.fetch_ready(10, 1020).await.unwrap().len(), 1);
        assert_eq!(store.fetch_ready(10, 1020).await.unwrap()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_terminal_messages_never_ready_again() {
        let store = seeded_store().await;
        let inserted = store
            .insert_messages(&[new_message("m1", 2)], 1000)
            .await
            .unwrap();
        store.mark_sent(&inserted[0].pk, 1010).await.unwrap();

        assert!(store.fetch_ready(10, i64::MAX - 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_insert_suppressed_after_processing() {
        let store = seeded_store().await;
        let first = store
            .insert_messages(&[new_message("m1", 2)], 1000)
            .await
            .unwrap();
        store.mark_sent(&first[0].pk, 1010).await.unwrap();

        // Re-submitting the same batch is a no-op for the processed id.
        let second = store
            .insert_messages(&[new_message("m1", 2)], 2000)
            .await
            .unwrap();
        assert!(second.is_empty());
        assert!(store.fetch_ready(10, 3000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_refreshes_unprocessed_message() {
        let store = seeded_store().await;
        let first = store
            .insert_messages(&[new_message("m1", 2)], 1000)
            .await
            .unwrap();

        let mut replacement = new_message("m1", 0);
        replacement.payload.subject = "Updated".to_string();
        let second = store.insert_messages(&[replacement], 2000).await.unwrap();

        // Same row, same pk, refreshed content.
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].pk, first[0].pk);
        let ready = store.fetch_ready(10, 3000).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].priority, 0);
        assert_eq!(ready[0].payload.subject, "Updated");
    }

    #[tokio::test]
    async fn test_no_cross_tenant_row_multiplication() {
        let store = seeded_store().await;
        // Same account id on a second tenant with a different host.
        store
            .upsert_account(&Account::new("t2", "a1", "smtp.t2.com", 587))
            .await
            .unwrap();
        store
            .insert_messages(&[new_message("m1", 2)], 1000)
            .await
            .unwrap();

        let ready = store.fetch_ready(10, 2000).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].tenant_id, "t1");
        assert_eq!(ready[0].account.host, "smtp.t1.com");
    }

    #[tokio::test]
    async fn test_message_without_account_stays_invisible() {
        let store = seeded_store().await;
        let mut orphan = new_message("m1", 2);
        orphan.account_id = "missing".to_string();
        store.insert_messages(&[orphan], 1000).await.unwrap();

        assert!(store.fetch_ready(10, 2000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retention_requires_all_events_reported() {
        let store = seeded_store().await;
        let inserted = store
            .insert_messages(&[new_message("m1", 2)], 1000)
            .await
            .unwrap();
        let pk = &inserted[0].pk;
        store.mark_sent(pk, 1010).await.unwrap();

        // Unreported event keeps the message alive.
        assert_eq!(store.remove_fully_reported_before(2000).await.unwrap(), 0);

        let unreported = store.fetch_unreported(10).await.unwrap();
        let ids: Vec<i64> = unreported.iter().map(|e| e.event_id).collect();
        store.mark_events_reported(&ids, 1500).await.unwrap();

        assert_eq!(store.remove_fully_reported_before(2000).await.unwrap(), 1);
        assert!(store.find_message_by_client_id("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payload_accepts_bare_string_recipient() {
        let json = r#"{"from": "a@a.com", "to": "x@example.com", "subject": "Test"}"#;
        let payload: MessagePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.to, vec!["x@example.com".to_string()]);
        assert_eq!(payload.content_type, "text/plain");
    }

    #[test]
    fn test_fetch_mode_inference() {
        assert_eq!(FetchMode::infer("base64:aGVsbG8="), FetchMode::Base64);
        assert_eq!(FetchMode::infer("/var/data/doc.pdf"), FetchMode::Filesystem);
        assert_eq!(FetchMode::infer("https://x.com/doc.pdf"), FetchMode::HttpUrl);
        assert_eq!(FetchMode::infer("docs/doc.pdf"), FetchMode::HttpEndpoint);
    }

    #[test]
    fn test_md5_marker_stripping() {
        let att = Attachment {
            filename: "report{MD5:abcdef0123456789}.pdf".to_string(),
            storage_path: "/data/report.pdf".to_string(),
            fetch_mode: None,
            content_md5: None,
        };
        assert_eq!(att.clean_filename(), "report.pdf");
        assert_eq!(att.cache_key().as_deref(), Some("abcdef0123456789"));

        let plain = Attachment {
            filename: "plain.txt".to_string(),
            storage_path: "/data/plain.txt".to_string(),
            fetch_mode: None,
            content_md5: Some("00ff".to_string()),
        };
        assert_eq!(plain.clean_filename(), "plain.txt");
        assert_eq!(plain.cache_key().as_deref(), Some("00ff"));
    }
}
