//! Outbound SMTP accounts, scoped to a tenant.
//!
//! Account identity is the composite `(tenant_id, id)`; two tenants may both
//! own an account called `smtp1` without colliding.

use serde::{Deserialize, Serialize};
use sqlx::{Row, sqlite::SqliteRow};

use crate::{error::Result, store::Store};

/// What to do with a message once an account's rate limit is hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitBehavior {
    /// Defer the message to the next window boundary.
    #[default]
    Defer,
    /// Fail the message permanently.
    Reject,
}

impl LimitBehavior {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Defer => "defer",
            Self::Reject => "reject",
        }
    }

    fn from_column(value: &str) -> Self {
        match value {
            "reject" => Self::Reject,
            _ => Self::Defer,
        }
    }
}

/// A configured outbound SMTP identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub tenant_id: String,
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
    /// Idle TTL for pooled connections to this account.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u32,
    /// Per-tick cap on messages dispatched through this account.
    #[serde(default)]
    pub batch_size: Option<u32>,
    /// Sliding-window send limits; zero or absent means unlimited.
    #[serde(default)]
    pub limit_per_minute: Option<u32>,
    #[serde(default)]
    pub limit_per_hour: Option<u32>,
    #[serde(default)]
    pub limit_per_day: Option<u32>,
    #[serde(default)]
    pub limit_behavior: LimitBehavior,
}

const fn default_use_tls() -> bool {
    true
}

const fn default_ttl_seconds() -> u32 {
    300
}

impl Account {
    /// Minimal account with defaults everywhere else.
    #[must_use]
    pub fn new(tenant_id: &str, id: &str, host: &str, port: u16) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            id: id.to_string(),
            host: host.to_string(),
            port,
            user: None,
            password: None,
            use_tls: default_use_tls(),
            ttl_seconds: default_ttl_seconds(),
            batch_size: None,
            limit_per_minute: None,
            limit_per_hour: None,
            limit_per_day: None,
            limit_behavior: LimitBehavior::Defer,
        }
    }

    /// The limit configured for a window length, if any.
    #[must_use]
    pub const fn limit_for_window(&self, window_secs: i64) -> Option<u32> {
        match window_secs {
            60 => self.limit_per_minute,
            3600 => self.limit_per_hour,
            86400 => self.limit_per_day,
            _ => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn account_from_row(row: &SqliteRow, store: &Store) -> Result<Account> {
    let password: Option<String> = row.try_get("password")?;
    let password = password
        .map(|sealed| store.secrets.open(&sealed))
        .transpose()?;
    let limit_behavior: String = row.try_get("limit_behavior")?;

    let to_u32 = |value: Option<i64>| value.map(|v| v.max(0).min(i64::from(u32::MAX)) as u32);

    Ok(Account {
        tenant_id: row.try_get("tenant_id")?,
        id: row.try_get("id")?,
        host: row.try_get("host")?,
        port: row.try_get::<i64, _>("port")?.clamp(0, i64::from(u16::MAX)) as u16,
        user: row.try_get("user")?,
        password,
        use_tls: row.try_get::<i64, _>("use_tls")? != 0,
        ttl_seconds: to_u32(row.try_get("ttl_seconds")?).unwrap_or_else(default_ttl_seconds),
        batch_size: to_u32(row.try_get("batch_size")?),
        limit_per_minute: to_u32(row.try_get("limit_per_minute")?),
        limit_per_hour: to_u32(row.try_get("limit_per_hour")?),
        limit_per_day: to_u32(row.try_get("limit_per_day")?),
        limit_behavior: LimitBehavior::from_column(&limit_behavior),
    })
}

impl Store {
    /// Create or replace an account by `(tenant_id, id)`.
    ///
    /// The password is sealed through the configured secrets provider before
    /// it is written.
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        let sealed = account
            .password
            .as_deref()
            .map(|plain| self.secrets.seal(plain))
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO accounts (
                tenant_id, id, host, port, user, password, use_tls, ttl_seconds,
                batch_size, limit_per_minute, limit_per_hour, limit_per_day, limit_behavior
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT (tenant_id, id) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                user = excluded.user,
                password = excluded.password,
                use_tls = excluded.use_tls,
                ttl_seconds = excluded.ttl_seconds,
                batch_size = excluded.batch_size,
                limit_per_minute = excluded.limit_per_minute,
                limit_per_hour = excluded.limit_per_hour,
                limit_per_day = excluded.limit_per_day,
                limit_behavior = excluded.limit_behavior
            ",
        )
        .bind(&account.tenant_id)
        .bind(&account.id)
        .bind(&account.host)
        .bind(i64::from(account.port))
        .bind(&account.user)
        .bind(sealed)
        .bind(i64::from(account.use_tls))
        .bind(i64::from(account.ttl_seconds))
        .bind(account.batch_size.map(i64::from))
        .bind(account.limit_per_minute.map(i64::from))
        .bind(account.limit_per_hour.map(i64::from))
        .bind(account.limit_per_day.map(i64::from))
        .bind(account.limit_behavior.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_account(&self, tenant_id: &str, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE tenant_id = ?1 AND id = ?2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| account_from_row(r, self)).transpose()
    }

    pub async fn list_accounts(&self, tenant_id: Option<&str>) -> Result<Vec<Account>> {
        let rows = match tenant_id {
            Some(tenant) => {
                sqlx::query("SELECT * FROM accounts WHERE tenant_id = ?1 ORDER BY tenant_id, id")
                    .bind(tenant)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM accounts ORDER BY tenant_id, id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(|r| account_from_row(r, self)).collect()
    }

    pub async fn delete_account(&self, tenant_id: &str, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE tenant_id = ?1 AND id = ?2")
            .bind(tenant_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
