//! Tenants: the tenancy boundary that owns accounts and messages.

use courier_common::ClientAuth;
use serde::{Deserialize, Serialize};
use sqlx::{Row, sqlite::SqliteRow};

use crate::{
    error::{Result, StoreError},
    store::Store,
};

/// One tenant of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Base URL of the tenant's report endpoint.
    #[serde(default)]
    pub client_base_url: Option<String>,
    /// Path joined to the base URL; defaults to `/proxy_sync` at call time.
    #[serde(default)]
    pub client_sync_path: Option<String>,
    #[serde(default)]
    pub client_auth: ClientAuth,
}

const fn default_active() -> bool {
    true
}

fn tenant_from_row(row: &SqliteRow) -> Result<Tenant> {
    let auth_json: String = row.try_get("client_auth")?;
    Ok(Tenant {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        active: row.try_get::<i64, _>("active")? != 0,
        client_base_url: row.try_get("client_base_url")?,
        client_sync_path: row.try_get("client_sync_path")?,
        client_auth: serde_json::from_str(&auth_json)?,
    })
}

impl Store {
    /// Create or replace a tenant by id.
    pub async fn upsert_tenant(&self, tenant: &Tenant) -> Result<()> {
        let auth_json = serde_json::to_string(&tenant.client_auth)?;
        sqlx::query(
            r"
            INSERT INTO tenants (id, name, active, client_base_url, client_sync_path, client_auth)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                client_base_url = excluded.client_base_url,
                client_sync_path = excluded.client_sync_path,
                client_auth = excluded.client_auth
            ",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(i64::from(tenant.active))
        .bind(&tenant.client_base_url)
        .bind(&tenant.client_sync_path)
        .bind(auth_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_tenant(&self, id: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(tenant_from_row).transpose()
    }

    pub async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT * FROM tenants ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tenant_from_row).collect()
    }

    /// Tenants eligible for report synchronization.
    pub async fn list_active_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT * FROM tenants WHERE active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(tenant_from_row).collect()
    }

    /// Delete a tenant. Restricted while the tenant still owns accounts.
    pub async fn delete_tenant(&self, id: &str) -> Result<()> {
        let (accounts,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM accounts WHERE tenant_id = ?1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if accounts > 0 {
            return Err(StoreError::TenantHasAccounts(id.to_string()));
        }

        sqlx::query("DELETE FROM tenants WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
