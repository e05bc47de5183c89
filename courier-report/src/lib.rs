//! Tenant report synchronizer.
//!
//! Groups unreported events per tenant, POSTs them to each tenant's sync
//! endpoint and marks acknowledged events as reported. Tenants without
//! events are still called on a heartbeat interval so none of them starves,
//! and a tenant can push back with a do-not-disturb timestamp that fresh
//! events override.

pub mod client;
pub mod payload;

use std::collections::HashMap;

use courier_common::{Signal, internal, time::epoch_now};
use courier_store::{Store, StoreError, UnreportedEvent};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Notify, broadcast};

pub use client::{DEFAULT_SYNC_PATH, SyncClient, SyncError, SyncResponse};
pub use payload::event_to_payload;

/// Seconds between heartbeat syncs for a quiet tenant.
pub const DEFAULT_SYNC_INTERVAL: i64 = 300;

/// Synchronizer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Heartbeat interval for tenants with nothing to report.
    #[serde(default = "defaults::sync_interval_secs")]
    pub sync_interval_secs: i64,

    /// Upper bound on events read per cycle.
    #[serde(default = "defaults::report_batch")]
    pub report_batch: u32,

    /// Fully reported messages older than this are removed; 0 disables.
    #[serde(default = "defaults::retention_seconds")]
    pub retention_seconds: i64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: defaults::sync_interval_secs(),
            report_batch: defaults::report_batch(),
            retention_seconds: defaults::retention_seconds(),
        }
    }
}

mod defaults {
    pub const fn sync_interval_secs() -> i64 {
        super::DEFAULT_SYNC_INTERVAL
    }

    pub const fn report_batch() -> u32 {
        500
    }

    pub const fn retention_seconds() -> i64 {
        3600
    }
}

/// Counters for one sync cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Tenants actually called.
    pub calls: usize,
    /// Events acknowledged and marked reported.
    pub reported: usize,
    /// Calls that failed and left their events queued.
    pub failures: usize,
    /// Messages removed by the retention sweep.
    pub removed: u64,
}

/// Per-tenant view surfaced by the status command.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct TenantSyncStatus {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub last_sync_ts: Option<i64>,
    pub in_dnd: bool,
    pub next_sync_due: bool,
}

/// Tick-level synchronizer failures.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The synchronizer task.
pub struct ReportSynchronizer {
    store: Store,
    client: SyncClient,
    config: ReportConfig,
    /// Last successful (or DND-stamped) sync time per tenant. A future value
    /// is a server-issued quiet period.
    last_sync: Mutex<HashMap<String, i64>>,
    /// When set, the next cycle only processes this tenant.
    run_now_tenant: Mutex<Option<String>>,
    wake: Notify,
}

impl ReportSynchronizer {
    #[must_use]
    pub fn new(store: Store, client: SyncClient, config: ReportConfig) -> Self {
        Self {
            store,
            client,
            config,
            last_sync: Mutex::new(HashMap::new()),
            run_now_tenant: Mutex::new(None),
            wake: Notify::new(),
        }
    }

    /// Heartbeat interval in seconds, for the status command.
    #[must_use]
    pub const fn sync_interval_secs(&self) -> i64 {
        self.config.sync_interval_secs
    }

    /// Request an immediate cycle. With a tenant id, its DND stamp is reset
    /// and the next cycle processes only that tenant.
    pub fn run_now(&self, tenant_id: Option<&str>) {
        if let Some(tenant) = tenant_id {
            self.last_sync.lock().insert(tenant.to_string(), 0);
            *self.run_now_tenant.lock() = Some(tenant.to_string());
        }
        self.wake.notify_one();
    }

    /// Sync state of every tenant, for the status command.
    pub async fn sync_status(&self, now: i64) -> Result<Vec<TenantSyncStatus>, ReportError> {
        let tenants = self.store.list_tenants().await?;
        let last_sync = self.last_sync.lock();

        Ok(tenants
            .into_iter()
            .map(|tenant| {
                let last = last_sync.get(&tenant.id).copied();
                TenantSyncStatus {
                    in_dnd: last.is_some_and(|l| l > now),
                    next_sync_due: last
                        .is_none_or(|l| now - l >= self.config.sync_interval_secs),
                    last_sync_ts: last,
                    id: tenant.id,
                    name: tenant.name,
                    active: tenant.active,
                }
            })
            .collect())
    }

    /// Seconds until the next scheduled cycle: the heartbeat interval, or
    /// sooner when a DND window expires first.
    #[must_use]
    pub fn next_wait(&self, now: i64) -> u64 {
        let interval = self.config.sync_interval_secs.max(1);
        let nearest_dnd = self
            .last_sync
            .lock()
            .values()
            .filter(|last| **last > now)
            .map(|last| last - now)
            .min();

        let wait = nearest_dnd.map_or(interval, |dnd| dnd.min(interval));
        u64::try_from(wait.max(1)).unwrap_or(1)
    }

    /// Run until shutdown; one cycle per wake or scheduled wait.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), ReportError> {
        internal!("report synchronizer starting");

        loop {
            let wait = std::time::Duration::from_secs(self.next_wait(epoch_now()));
            tokio::select! {
                () = tokio::time::sleep(wait) => {
                    self.run_cycle().await;
                }
                () = self.wake.notified() => {
                    self.run_cycle().await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("report synchronizer shutting down");
                            break;
                        }
                        Err(e) => {
                            tracing::error!("report shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn run_cycle(&self) {
        match self.process_cycle(epoch_now()).await {
            Ok(stats) if stats == CycleStats::default() => {
                tracing::trace!("report cycle: nothing to do");
            }
            Ok(stats) => {
                tracing::debug!(
                    calls = stats.calls,
                    reported = stats.reported,
                    failures = stats.failures,
                    removed = stats.removed,
                    "report cycle complete"
                );
            }
            Err(e) => tracing::error!("report cycle failed: {e}"),
        }
    }

    /// One synchronization pass at `now`. Public so tests and the control
    /// plane can drive the clock.
    pub async fn process_cycle(&self, now: i64) -> Result<CycleStats, ReportError> {
        let mut stats = CycleStats::default();

        let events = self.store.fetch_unreported(self.config.report_batch).await?;
        let mut per_tenant: HashMap<String, Vec<UnreportedEvent>> = HashMap::new();
        for event in events {
            per_tenant.entry(event.tenant_id.clone()).or_default().push(event);
        }

        let focus = self.run_now_tenant.lock().take();
        let tenants = self.store.list_active_tenants().await?;

        for tenant in tenants {
            if let Some(target) = &focus {
                if *target != tenant.id {
                    continue;
                }
            }

            let tenant_events = per_tenant.remove(&tenant.id).unwrap_or_default();
            let payloads: Vec<serde_json::Value> =
                tenant_events.iter().map(event_to_payload).collect();

            let last = self.last_sync.lock().get(&tenant.id).copied();

            // A future stamp is a DND window; fresh events override it.
            if last.is_some_and(|l| l > now) && payloads.is_empty() {
                continue;
            }

            let due = last.is_none_or(|l| now - l >= self.config.sync_interval_secs)
                || !payloads.is_empty();
            if !due {
                continue;
            }

            if tenant.client_base_url.is_none() {
                tracing::warn!(tenant = %tenant.id, "tenant has no sync URL, skipping");
                continue;
            }

            stats.calls += 1;
            match self.client.sync(&tenant, &payloads).await {
                Ok(response) => {
                    let acked: std::collections::HashSet<&str> =
                        response.acked_ids().into_iter().collect();
                    let event_ids: Vec<i64> = tenant_events
                        .iter()
                        .filter(|event| acked.contains(event.message_id.as_str()))
                        .map(|event| event.event_id)
                        .collect();

                    if !event_ids.is_empty() {
                        self.store.mark_events_reported(&event_ids, now).await?;
                        stats.reported += event_ids.len();
                    }

                    if let Some(queued) = response.queued.filter(|q| *q > 0) {
                        tracing::debug!(tenant = %tenant.id, queued, "tenant reports backpressure");
                    }

                    self.last_sync
                        .lock()
                        .insert(tenant.id.clone(), response.next_sync_after.unwrap_or(now));
                }
                Err(e) => {
                    // Events stay queued for the next cycle.
                    tracing::warn!(tenant = %tenant.id, "report delivery failed: {e}");
                    stats.failures += 1;
                }
            }
        }

        if self.config.retention_seconds > 0 {
            stats.removed = self
                .store
                .remove_fully_reported_before(now - self.config.retention_seconds)
                .await?;
            if stats.removed > 0 {
                tracing::debug!(removed = stats.removed, "retention sweep removed messages");
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use courier_common::ClientAuth;
    use courier_store::{Account, MessagePayload, NewMessage, Tenant};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn store_with_tenant(base_url: &str, auth: ClientAuth) -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_tenant(&Tenant {
                id: "t1".to_string(),
                name: "Tenant One".to_string(),
                active: true,
                client_base_url: Some(base_url.to_string()),
                client_sync_path: None,
                client_auth: auth,
            })
            .await
            .unwrap();
        store
            .upsert_account(&Account::new("t1", "a1", "smtp.example.com", 587))
            .await
            .unwrap();
        store
    }

    async fn insert_sent_message(store: &Store, id: &str, ts: i64) -> String {
        let payload: MessagePayload = serde_json::from_str(
            r#"{"from": "s@e.com", "to": "r@e.com", "subject": "Hi", "body": "x"}"#,
        )
        .unwrap();
        let inserted = store
            .insert_messages(
                &[NewMessage {
                    id: id.to_string(),
                    tenant_id: "t1".to_string(),
                    account_id: "a1".to_string(),
                    priority: 2,
                    payload,
                }],
                ts,
            )
            .await
            .unwrap();
        store.mark_sent(&inserted[0].pk, ts + 1).await.unwrap();
        inserted[0].pk.clone()
    }

    fn synchronizer(store: Store) -> ReportSynchronizer {
        ReportSynchronizer::new(store, SyncClient::default(), ReportConfig::default())
    }

    #[tokio::test]
    async fn test_reports_posted_and_acked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proxy_sync"))
            .and(body_partial_json(serde_json::json!({
                "reports": [{"id": "m1", "account_id": "a1"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sent": ["m1"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        insert_sent_message(&store, "m1", 1000).await;

        let sync = synchronizer(store.clone());
        let stats = sync.process_cycle(2000).await.unwrap();

        assert_eq!(stats.calls, 1);
        assert_eq!(stats.reported, 1);
        assert!(store.fetch_unreported(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bearer_auth_header_applied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/proxy_sync"))
            .and(header("Authorization", "Bearer secret123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_with_tenant(
            &server.uri(),
            ClientAuth::Bearer {
                token: "secret123".to_string(),
            },
        )
        .await;
        insert_sent_message(&store, "m1", 1000).await;

        synchronizer(store).process_cycle(2000).await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_sync_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/custom/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        let mut tenant = store.get_tenant("t1").await.unwrap().unwrap();
        tenant.client_sync_path = Some("/custom/sync".to_string());
        store.upsert_tenant(&tenant).await.unwrap();
        insert_sent_message(&store, "m1", 1000).await;

        synchronizer(store).process_cycle(2000).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_call_keeps_events_queued() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        insert_sent_message(&store, "m1", 1000).await;

        let sync = synchronizer(store.clone());
        let stats = sync.process_cycle(2000).await.unwrap();

        assert_eq!(stats.failures, 1);
        assert_eq!(stats.reported, 0);
        assert_eq!(store.fetch_unreported(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unacked_events_stay_queued() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sent": [], "queued": 7
            })))
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        insert_sent_message(&store, "m1", 1000).await;

        let sync = synchronizer(store.clone());
        let stats = sync.process_cycle(2000).await.unwrap();

        assert_eq!(stats.calls, 1);
        assert_eq!(stats.reported, 0);
        assert_eq!(store.fetch_unreported(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_for_quiet_tenant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"reports": []})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(2)
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        let sync = synchronizer(store);

        // Never synced: called immediately, with an empty batch.
        sync.process_cycle(1000).await.unwrap();
        // Inside the interval: not called.
        let stats = sync.process_cycle(1010).await.unwrap();
        assert_eq!(stats.calls, 0);
        // Interval elapsed: heartbeat again.
        let stats = sync.process_cycle(1000 + DEFAULT_SYNC_INTERVAL).await.unwrap();
        assert_eq!(stats.calls, 1);
    }

    #[tokio::test]
    async fn test_dnd_respected_until_events_arrive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sent": ["m1"],
                "next_sync_after": 10_000
            })))
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        insert_sent_message(&store, "m1", 1000).await;

        let sync = synchronizer(store.clone());
        let stats = sync.process_cycle(2000).await.unwrap();
        assert_eq!(stats.calls, 1);

        // Quiet period: even past the heartbeat interval, no call.
        let stats = sync.process_cycle(2000 + DEFAULT_SYNC_INTERVAL).await.unwrap();
        assert_eq!(stats.calls, 0);

        // Fresh events override the DND window.
        insert_sent_message(&store, "m2", 3000).await;
        let stats = sync.process_cycle(3500).await.unwrap();
        assert_eq!(stats.calls, 1);

        // After the window expires the heartbeat resumes.
        let stats = sync.process_cycle(20_000).await.unwrap();
        assert_eq!(stats.calls, 1);
    }

    #[tokio::test]
    async fn test_run_now_focuses_one_tenant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        store
            .upsert_tenant(&Tenant {
                id: "t2".to_string(),
                name: String::new(),
                active: true,
                client_base_url: Some(server.uri()),
                client_sync_path: None,
                client_auth: ClientAuth::None,
            })
            .await
            .unwrap();

        let sync = synchronizer(store);
        sync.run_now(Some("t1"));
        let stats = sync.process_cycle(1000).await.unwrap();
        // Only the focused tenant is called.
        assert_eq!(stats.calls, 1);

        // The focus is consumed: the next cycle sees both tenants.
        let stats = sync.process_cycle(1000 + DEFAULT_SYNC_INTERVAL).await.unwrap();
        assert_eq!(stats.calls, 2);
    }

    #[tokio::test]
    async fn test_run_now_resets_dnd() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "next_sync_after": 999_999
            })))
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        let sync = synchronizer(store);

        sync.process_cycle(1000).await.unwrap();
        let status = sync.sync_status(2000).await.unwrap();
        assert!(status[0].in_dnd);

        sync.run_now(Some("t1"));
        let status = sync.sync_status(2000).await.unwrap();
        assert!(!status[0].in_dnd);
        assert_eq!(status[0].last_sync_ts, Some(0));
    }

    #[tokio::test]
    async fn test_inactive_tenant_never_called() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        let mut tenant = store.get_tenant("t1").await.unwrap().unwrap();
        tenant.active = false;
        store.upsert_tenant(&tenant).await.unwrap();
        insert_sent_message(&store, "m1", 1000).await;

        let stats = synchronizer(store).process_cycle(2000).await.unwrap();
        assert_eq!(stats.calls, 0);
    }

    #[tokio::test]
    async fn test_retention_removes_fully_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sent": ["m1"]
            })))
            .mount(&server)
            .await;

        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        insert_sent_message(&store, "m1", 1000).await;

        let sync = synchronizer(store.clone());
        sync.process_cycle(2000).await.unwrap();

        // Far in the future, the acked message falls out of retention.
        let stats = sync.process_cycle(2000 + 7200).await.unwrap();
        assert_eq!(stats.removed, 1);
        assert!(store.find_message_by_client_id("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_next_wait_tracks_nearest_dnd_expiry() {
        let server = MockServer::start().await;
        let store = store_with_tenant(&server.uri(), ClientAuth::None).await;
        let sync = synchronizer(store);

        assert_eq!(
            sync.next_wait(1000),
            u64::try_from(DEFAULT_SYNC_INTERVAL).unwrap()
        );

        sync.last_sync.lock().insert("t1".to_string(), 1030);
        assert_eq!(sync.next_wait(1000), 30);
    }
}
