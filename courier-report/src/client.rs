//! HTTP client for tenant sync endpoints.

use std::time::Duration;

use courier_store::Tenant;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Path appended to the tenant base URL when none is configured.
pub const DEFAULT_SYNC_PATH: &str = "/proxy_sync";

/// Errors from one sync call. All of them leave the tenant's events
/// unreported for the next cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The tenant has no base URL configured.
    #[error("tenant '{0}' has no client_base_url")]
    MissingUrl(String),

    /// Network-level failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered outside 2xx.
    #[error("endpoint returned status {0}")]
    Status(u16),
}

/// What a tenant may answer to a report batch. Every field is optional;
/// unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    /// Message ids acknowledged as delivered to the tenant.
    #[serde(default)]
    pub sent: Vec<String>,
    /// Message ids acknowledged with a processing error on the tenant side.
    #[serde(default)]
    pub error: Vec<String>,
    /// Message ids the tenant does not recognize; acknowledged anyway so
    /// they stop being resent.
    #[serde(default)]
    pub not_found: Vec<String>,
    /// Backpressure signal: how many reports the tenant has queued.
    #[serde(default)]
    pub queued: Option<u64>,
    /// Server-issued do-not-disturb: do not call again before this time.
    #[serde(default)]
    pub next_sync_after: Option<i64>,
}

impl SyncResponse {
    /// Every message id the response acknowledges.
    #[must_use]
    pub fn acked_ids(&self) -> Vec<&str> {
        self.sent
            .iter()
            .chain(self.error.iter())
            .chain(self.not_found.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Posts report batches to tenant endpoints.
#[derive(Debug, Clone)]
pub struct SyncClient {
    http: reqwest::Client,
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl SyncClient {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// POST `{"reports": [...]}` to the tenant's sync URL with its
    /// configured auth.
    pub async fn sync(
        &self,
        tenant: &Tenant,
        payloads: &[Value],
    ) -> Result<SyncResponse, SyncError> {
        let base = tenant
            .client_base_url
            .as_deref()
            .ok_or_else(|| SyncError::MissingUrl(tenant.id.clone()))?;
        let path = tenant
            .client_sync_path
            .as_deref()
            .unwrap_or(DEFAULT_SYNC_PATH);
        let url = format!("{}{path}", base.trim_end_matches('/'));

        let mut request = self.http.post(&url).json(&json!({ "reports": payloads }));
        if let Some(header) = tenant.client_auth.authorization_header() {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status(status.as_u16()));
        }

        // A 2xx with a non-JSON body counts as an ack-less success.
        Ok(response.json().await.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acked_ids_merges_all_lists() {
        let response = SyncResponse {
            sent: vec!["a".to_string()],
            error: vec!["b".to_string()],
            not_found: vec!["c".to_string()],
            queued: None,
            next_sync_after: None,
        };
        assert_eq!(response.acked_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_response_tolerates_unknown_and_missing_keys() {
        let response: SyncResponse =
            serde_json::from_str(r#"{"ok": true, "queued": 5, "something": [1, 2]}"#).unwrap();
        assert!(response.sent.is_empty());
        assert_eq!(response.queued, Some(5));
        assert_eq!(response.next_sync_after, None);
    }
}
