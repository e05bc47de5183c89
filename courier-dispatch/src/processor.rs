//! The dispatch processor: tick loop, grouping, rate planning and outcome
//! recording.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use courier_common::{Signal, internal, time::epoch_now};
use courier_store::{EventType, ReadyMessage, Store};
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::{Notify, broadcast};

use crate::{
    attachments::AttachmentFetcher,
    error::{Result, SendError},
    mime::{FetchedAttachment, build_mime, envelope_recipients},
    rate_limit::RateLimiter,
    retry::RetryStrategy,
    transport::MailTransport,
};

/// Dispatch loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between ticks when nothing wakes the loop early.
    #[serde(default = "defaults::tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Seconds between pool cleanup passes.
    #[serde(default = "defaults::cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Upper bound on messages read per tick.
    #[serde(default = "defaults::global_batch")]
    pub global_batch: u32,

    /// Concurrent sends allowed per account within a tick.
    #[serde(default = "defaults::max_concurrency_per_account")]
    pub max_concurrency_per_account: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: defaults::tick_interval_secs(),
            cleanup_interval_secs: defaults::cleanup_interval_secs(),
            global_batch: defaults::global_batch(),
            max_concurrency_per_account: defaults::max_concurrency_per_account(),
        }
    }
}

mod defaults {
    pub const fn tick_interval_secs() -> u64 {
        5
    }

    pub const fn cleanup_interval_secs() -> u64 {
        60
    }

    pub const fn global_batch() -> u32 {
        100
    }

    pub const fn max_concurrency_per_account() -> usize {
        4
    }
}

/// Counters for one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub sent: usize,
    pub deferred: usize,
    pub errored: usize,
    pub rate_deferred: usize,
    pub rate_rejected: usize,
    pub suspended: usize,
}

/// An externally ingested bounce receipt.
#[derive(Debug, Clone, Deserialize)]
pub struct BounceInfo {
    pub bounce_type: String,
    #[serde(default)]
    pub bounce_code: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub ts: i64,
}

/// Drains ready messages and drives them to a terminal outcome.
pub struct DispatchProcessor {
    config: DispatchConfig,
    store: Store,
    transport: Arc<dyn MailTransport>,
    fetcher: Arc<dyn AttachmentFetcher>,
    limiter: RateLimiter,
    retry: RetryStrategy,
    /// Global on/off switch; `suspend(None, _)` pauses everything.
    active: AtomicBool,
    /// Per-tenant suspended batch codes; `"*"` covers the whole tenant.
    suspended: RwLock<HashMap<String, HashSet<String>>>,
    wake: Notify,
}

impl DispatchProcessor {
    #[must_use]
    pub fn new(
        store: Store,
        transport: Arc<dyn MailTransport>,
        fetcher: Arc<dyn AttachmentFetcher>,
        config: DispatchConfig,
        retry: RetryStrategy,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(store.clone()),
            config,
            store,
            transport,
            fetcher,
            retry,
            active: AtomicBool::new(true),
            suspended: RwLock::new(HashMap::new()),
            wake: Notify::new(),
        }
    }

    /// Nudge the loop to run a tick before its interval elapses.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Whether dispatch is globally active (not suspended as a whole).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Pause dispatch: globally, for a whole tenant, or for one batch code.
    pub fn suspend(&self, tenant_id: Option<&str>, batch_code: Option<&str>) {
        match tenant_id {
            None => {
                self.active.store(false, Ordering::SeqCst);
                internal!(level = INFO, "dispatch suspended");
            }
            Some(tenant) => {
                let mut suspended = self.suspended.write();
                let batches = suspended.entry(tenant.to_string()).or_default();
                batches.insert(batch_code.unwrap_or("*").to_string());
            }
        }
    }

    /// Undo a matching `suspend`.
    pub fn activate(&self, tenant_id: Option<&str>, batch_code: Option<&str>) {
        match tenant_id {
            None => {
                self.active.store(true, Ordering::SeqCst);
                self.wake();
            }
            Some(tenant) => {
                let mut suspended = self.suspended.write();
                match batch_code {
                    None => {
                        suspended.remove(tenant);
                    }
                    Some(batch) => {
                        if let Some(batches) = suspended.get_mut(tenant) {
                            batches.remove(batch);
                            if batches.is_empty() {
                                suspended.remove(tenant);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Snapshot of suspended tenants and their batch codes.
    #[must_use]
    pub fn suspended_summary(&self) -> Vec<(String, Vec<String>)> {
        let suspended = self.suspended.read();
        let mut summary: Vec<(String, Vec<String>)> = suspended
            .iter()
            .map(|(tenant, batches)| {
                let mut codes: Vec<String> = batches.iter().cloned().collect();
                codes.sort();
                (tenant.clone(), codes)
            })
            .collect();
        summary.sort();
        summary
    }

    fn is_suspended(&self, message: &ReadyMessage) -> bool {
        let suspended = self.suspended.read();
        suspended.get(&message.tenant_id).is_some_and(|batches| {
            batches.contains("*")
                || message
                    .batch_code
                    .as_deref()
                    .is_some_and(|code| batches.contains(code))
        })
    }

    /// Run until shutdown. One tick per interval or wake, pool cleanup on its
    /// own timer. A tick always runs to completion; the stop signal is only
    /// honored between ticks.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        internal!("dispatch processor starting");

        let mut tick_timer =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        let mut cleanup_timer =
            tokio::time::interval(Duration::from_secs(self.config.cleanup_interval_secs.max(1)));

        // Skip the immediate first firing of both timers.
        tick_timer.tick().await;
        cleanup_timer.tick().await;

        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    self.run_tick().await;
                }
                () = self.wake.notified() => {
                    self.run_tick().await;
                }
                _ = cleanup_timer.tick() => {
                    self.transport.cleanup().await;
                    // Send-log rows older than the widest window can no
                    // longer affect any rate plan.
                    let cutoff = epoch_now() - 2 * 86400;
                    if let Err(e) = self.store.prune_send_log_before(cutoff).await {
                        tracing::warn!("send log prune failed: {e}");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("dispatch processor shutting down");
                            break;
                        }
                        Err(e) => {
                            tracing::error!("dispatch shutdown channel error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        self.transport.shutdown().await;
        Ok(())
    }

    async fn run_tick(&self) {
        match self.tick_at(epoch_now()).await {
            Ok(stats) if stats == TickStats::default() => {
                tracing::trace!("dispatch tick: nothing to do");
            }
            Ok(stats) => {
                tracing::debug!(
                    sent = stats.sent,
                    deferred = stats.deferred,
                    errored = stats.errored,
                    rate_deferred = stats.rate_deferred,
                    rate_rejected = stats.rate_rejected,
                    "dispatch tick complete"
                );
            }
            // Tick-level failures (store down) are retried on schedule.
            Err(e) => tracing::error!("dispatch tick failed: {e}"),
        }
    }

    /// One dispatch pass at `now`. Public so tests and the control plane can
    /// drive the clock.
    pub async fn tick_at(&self, now: i64) -> Result<TickStats> {
        let mut stats = TickStats::default();

        if !self.active.load(Ordering::SeqCst) {
            return Ok(stats);
        }

        let batch = self.store.fetch_ready(self.config.global_batch, now).await?;
        if batch.is_empty() {
            return Ok(stats);
        }

        // Group by account, preserving the store's (priority, created_at)
        // order within each group.
        let mut groups: Vec<(String, Vec<ReadyMessage>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for message in batch {
            if self.is_suspended(&message) {
                stats.suspended += 1;
                continue;
            }
            let key = format!("{}/{}", message.tenant_id, message.account_id);
            match index.get(&key) {
                Some(&i) => groups[i].1.push(message),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![message]));
                }
            }
        }

        // Rate planning runs sequentially per group so one tick cannot blow
        // through a window; actual sends then fan out bounded.
        let mut send_groups: Vec<Vec<ReadyMessage>> = Vec::new();
        for (_, mut group) in groups {
            let account = group[0].account.clone();
            if let Some(batch_size) = account.batch_size.filter(|b| *b > 0) {
                group.truncate(batch_size as usize);
            }

            let mut approved: Vec<ReadyMessage> = Vec::new();
            for message in group {
                let plan = self
                    .limiter
                    .plan_with_pending(&account, now, approved.len() as i64)
                    .await?;

                match plan.defer_until {
                    None => approved.push(message),
                    Some(_) if plan.reject => {
                        if let Err(e) =
                            self.store.mark_error(&message.pk, now, "rate_limit_reject").await
                        {
                            tracing::error!(pk = %message.pk, "failed to record rate reject: {e}");
                        }
                        stats.rate_rejected += 1;
                    }
                    Some(until) => {
                        if let Err(e) = self
                            .store
                            .set_deferred(&message.pk, now, until, Some("rate_limit"))
                            .await
                        {
                            tracing::error!(pk = %message.pk, "failed to defer: {e}");
                        }
                        stats.rate_deferred += 1;
                    }
                }
            }
            if !approved.is_empty() {
                send_groups.push(approved);
            }
        }

        let sent = AtomicUsize::new(0);
        let deferred = AtomicUsize::new(0);
        let errored = AtomicUsize::new(0);

        let concurrency = self.config.max_concurrency_per_account.max(1);
        let group_futures = send_groups.into_iter().map(|group| {
            let sent = &sent;
            let deferred = &deferred;
            let errored = &errored;
            async move {
                futures_util::stream::iter(group)
                    .for_each_concurrent(concurrency, |message| async move {
                        match self.deliver(&message, now).await {
                            Outcome::Sent => sent.fetch_add(1, Ordering::Relaxed),
                            Outcome::Deferred => deferred.fetch_add(1, Ordering::Relaxed),
                            Outcome::Errored => errored.fetch_add(1, Ordering::Relaxed),
                        };
                    })
                    .await;
            }
        });
        futures_util::future::join_all(group_futures).await;

        stats.sent = sent.into_inner();
        stats.deferred = deferred.into_inner();
        stats.errored = errored.into_inner();
        Ok(stats)
    }

    /// Deliver one message and record exactly one outcome event.
    async fn deliver(&self, message: &ReadyMessage, now: i64) -> Outcome {
        let mut attachments = Vec::with_capacity(message.payload.attachments.len());
        for attachment in &message.payload.attachments {
            match self.fetcher.fetch(attachment).await {
                Ok((content, filename)) => {
                    attachments.push(FetchedAttachment { filename, content });
                }
                Err(e) => {
                    return self
                        .handle_failure(message, &SendError::Protocol(e.to_string()), now)
                        .await;
                }
            }
        }

        let recipients = envelope_recipients(message);
        if recipients.is_empty() {
            if let Err(e) = self.store.mark_error(&message.pk, now, "no recipients").await {
                tracing::error!(pk = %message.pk, "failed to record error: {e}");
            }
            return Outcome::Errored;
        }

        let data = build_mime(message, &attachments, now);

        match self
            .transport
            .send(&message.account, &message.payload.from, &recipients, &data)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.store.record_sent(&message.pk, &message.account_id, now).await
                {
                    tracing::error!(pk = %message.pk, "failed to record sent outcome: {e}");
                }
                Outcome::Sent
            }
            Err(error) => self.handle_failure(message, &error, now).await,
        }
    }

    async fn handle_failure(
        &self,
        message: &ReadyMessage,
        error: &SendError,
        now: i64,
    ) -> Outcome {
        let description = error.to_string();

        if self.retry.should_retry(message.attempts, error) {
            let delay = self.retry.calculate_delay(message.attempts);
            let until = now + i64::try_from(delay).unwrap_or(3600);
            tracing::debug!(
                pk = %message.pk,
                attempt = message.attempts,
                until,
                "delivery failed, deferring: {description}"
            );
            if let Err(e) = self
                .store
                .set_deferred(&message.pk, now, until, Some(&description))
                .await
            {
                tracing::error!(pk = %message.pk, "failed to defer: {e}");
            }
            Outcome::Deferred
        } else {
            tracing::warn!(pk = %message.pk, "delivery failed permanently: {description}");
            if let Err(e) = self.store.mark_error(&message.pk, now, &description).await {
                tracing::error!(pk = %message.pk, "failed to record error: {e}");
            }
            Outcome::Errored
        }
    }

    /// Record an externally ingested bounce receipt against the message the
    /// mail id header pointed at. Returns `false` when no message matches.
    pub async fn record_bounce(&self, message_id: &str, info: &BounceInfo) -> Result<bool> {
        let Some((pk, _tenant)) = self.store.find_message_by_client_id(message_id).await? else {
            return Ok(false);
        };

        let metadata = serde_json::json!({
            "bounce_type": info.bounce_type,
            "bounce_code": info.bounce_code,
        });
        self.store
            .add_event(
                &pk,
                EventType::Bounce,
                info.ts,
                info.reason.as_deref(),
                Some(&metadata),
            )
            .await?;
        Ok(true)
    }
}

enum Outcome {
    Sent,
    Deferred,
    Errored,
}

#[cfg(test)]
mod tests {
    use courier_store::{Account, LimitBehavior, NewMessage, Tenant};
    use tokio::sync::Mutex;

    use super::*;
    use crate::attachments::LocalFetcher;

    #[derive(Debug, Clone)]
    struct SentMail {
        host: String,
        from: String,
        recipients: Vec<String>,
        data: String,
    }

    /// Transport stub: records sends and fails with queued errors first.
    struct MockTransport {
        sent: Mutex<Vec<SentMail>>,
        failures: Mutex<Vec<SendError>>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
            })
        }

        async fn push_failure(&self, error: SendError) {
            self.failures.lock().await.push(error);
        }

        async fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl MailTransport for MockTransport {
        async fn send(
            &self,
            account: &Account,
            mail_from: &str,
            rcpt_to: &[String],
            data: &str,
        ) -> std::result::Result<(), SendError> {
            let failure = self.failures.lock().await.pop();
            if let Some(error) = failure {
                return Err(error);
            }
            self.sent.lock().await.push(SentMail {
                host: account.host.clone(),
                from: mail_from.to_string(),
                recipients: rcpt_to.to_vec(),
                data: data.to_string(),
            });
            Ok(())
        }

        async fn cleanup(&self) {}

        async fn shutdown(&self) {}
    }

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store
            .upsert_tenant(&Tenant {
                id: "t1".to_string(),
                name: String::new(),
                active: true,
                client_base_url: None,
                client_sync_path: None,
                client_auth: courier_common::ClientAuth::None,
            })
            .await
            .unwrap();
        store
            .upsert_account(&Account::new("t1", "a1", "smtp.t1.com", 587))
            .await
            .unwrap();
        store
    }

    fn processor(store: Store, transport: Arc<MockTransport>) -> DispatchProcessor {
        DispatchProcessor::new(
            store,
            transport,
            Arc::new(LocalFetcher),
            DispatchConfig::default(),
            RetryStrategy::default(),
        )
    }

    fn message(id: &str) -> NewMessage {
        serde_json::from_str(&format!(
            r#"{{
                "id": "{id}",
                "tenant_id": "t1",
                "account_id": "a1",
                "payload": {{
                    "from": "s@e.com",
                    "to": ["r@e.com"],
                    "subject": "Hi",
                    "body": "x"
                }}
            }}"#
        ))
        .unwrap()
    }

    async fn terminal_events(store: &Store, pk: &str) -> Vec<EventType> {
        store
            .list_events(pk)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    #[tokio::test]
    async fn test_happy_path_sends_and_logs() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());

        let inserted = store.insert_messages(&[message("m1")], 999).await.unwrap();
        let stats = processor.tick_at(1000).await.unwrap();

        assert_eq!(stats.sent, 1);
        let sent = transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "s@e.com");
        assert_eq!(sent[0].recipients, vec!["r@e.com"]);
        assert!(sent[0].data.contains("X-Courier-Mail-ID: m1"));

        assert_eq!(
            terminal_events(&store, &inserted[0].pk).await,
            vec![EventType::Sent]
        );
        assert_eq!(store.count_sends_since("a1", 1000).await.unwrap(), 1);
        assert!(store.fetch_ready(10, 2000).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_defers_second_message() {
        let store = seeded_store().await;
        let mut account = Account::new("t1", "a1", "smtp.t1.com", 587);
        account.limit_per_minute = Some(1);
        store.upsert_account(&account).await.unwrap();

        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());

        store
            .insert_messages(&[message("m1"), message("m2")], 999)
            .await
            .unwrap();

        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.rate_deferred, 1);

        // m2 waits for the next minute boundary.
        assert!(store.fetch_ready(10, 1019).await.unwrap().is_empty());
        let ready = store.fetch_ready(10, 1020).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "m2");

        let stats = processor.tick_at(1020).await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(transport.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_reject_behavior() {
        let store = seeded_store().await;
        let mut account = Account::new("t1", "a1", "smtp.t1.com", 587);
        account.limit_per_minute = Some(1);
        account.limit_behavior = LimitBehavior::Reject;
        store.upsert_account(&account).await.unwrap();

        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());
        store
            .insert_messages(&[message("m1"), message("m2")], 999)
            .await
            .unwrap();

        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.rate_rejected, 1);

        // The rejected message is terminal with an error event.
        assert!(store.fetch_ready(10, 10_000).await.unwrap().is_empty());
        let unreported = store.fetch_unreported(10).await.unwrap();
        let error = unreported
            .iter()
            .find(|e| e.event_type == EventType::Error)
            .unwrap();
        assert_eq!(error.description.as_deref(), Some("rate_limit_reject"));
    }

    #[tokio::test]
    async fn test_permanent_error_never_retries() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        transport
            .push_failure(SendError::Smtp {
                code: 535,
                message: "authentication failed".to_string(),
            })
            .await;
        let processor = processor(store.clone(), transport.clone());

        let inserted = store.insert_messages(&[message("m1")], 999).await.unwrap();
        let stats = processor.tick_at(1000).await.unwrap();

        assert_eq!(stats.errored, 1);
        assert_eq!(
            terminal_events(&store, &inserted[0].pk).await,
            vec![EventType::Error]
        );
        // Terminal: nothing left for any future tick.
        assert!(store.fetch_ready(10, i64::MAX - 1).await.unwrap().is_empty());
        assert!(transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        transport
            .push_failure(SendError::Timeout("connect".to_string()))
            .await;
        let processor = processor(store.clone(), transport.clone());

        let inserted = store.insert_messages(&[message("m1")], 999).await.unwrap();
        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats.deferred, 1);

        // First retry delay is 60s.
        assert!(store.fetch_ready(10, 1059).await.unwrap().is_empty());
        let stats = processor.tick_at(1060).await.unwrap();
        assert_eq!(stats.sent, 1);

        assert_eq!(
            terminal_events(&store, &inserted[0].pk).await,
            vec![EventType::Deferred, EventType::Sent]
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted_becomes_error() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());
        let inserted = store.insert_messages(&[message("m1")], 0).await.unwrap();

        let mut now = 1000;
        for _ in 0..DEFAULT_MAX_RETRIES_PLUS_FINAL {
            transport
                .push_failure(SendError::Timeout("connect".to_string()))
                .await;
            processor.tick_at(now).await.unwrap();
            // Jump past whatever deferral was scheduled.
            now += 4000;
        }

        let events = terminal_events(&store, &inserted[0].pk).await;
        assert_eq!(
            events.iter().filter(|e| **e == EventType::Deferred).count(),
            5
        );
        assert_eq!(events.last(), Some(&EventType::Error));
        assert!(store.fetch_ready(10, now + 10_000).await.unwrap().is_empty());
    }

    const DEFAULT_MAX_RETRIES_PLUS_FINAL: usize = 6;

    #[tokio::test]
    async fn test_cross_tenant_delivery_uses_own_host() {
        let store = seeded_store().await;
        store
            .upsert_tenant(&Tenant {
                id: "t2".to_string(),
                name: String::new(),
                active: true,
                client_base_url: None,
                client_sync_path: None,
                client_auth: courier_common::ClientAuth::None,
            })
            .await
            .unwrap();
        store
            .upsert_account(&Account::new("t2", "a1", "smtp.t2.com", 587))
            .await
            .unwrap();

        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());

        let mut other = message("m2");
        other.tenant_id = "t2".to_string();
        store
            .insert_messages(&[message("m1"), other], 999)
            .await
            .unwrap();

        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats.sent, 2);

        let mut hosts: Vec<String> = transport.sent().await.iter().map(|s| s.host.clone()).collect();
        hosts.sort();
        assert_eq!(hosts, vec!["smtp.t1.com", "smtp.t2.com"]);
    }

    #[tokio::test]
    async fn test_suspension_skips_and_activation_resumes() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());
        store.insert_messages(&[message("m1")], 999).await.unwrap();

        processor.suspend(Some("t1"), None);
        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.suspended, 1);
        assert_eq!(
            processor.suspended_summary(),
            vec![("t1".to_string(), vec!["*".to_string()])]
        );

        processor.activate(Some("t1"), None);
        let stats = processor.tick_at(1001).await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn test_batch_code_suspension_is_selective() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());

        let mut campaign = message("m1");
        campaign.payload.batch_code = Some("newsletter".to_string());
        store
            .insert_messages(&[campaign, message("m2")], 999)
            .await
            .unwrap();

        processor.suspend(Some("t1"), Some("newsletter"));
        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.suspended, 1);
        assert_eq!(transport.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_global_suspend_halts_dispatch() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());
        store.insert_messages(&[message("m1")], 999).await.unwrap();

        processor.suspend(None, None);
        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats, TickStats::default());

        processor.activate(None, None);
        let stats = processor.tick_at(1001).await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn test_account_batch_size_caps_a_tick() {
        let store = seeded_store().await;
        let mut account = Account::new("t1", "a1", "smtp.t1.com", 587);
        account.batch_size = Some(1);
        store.upsert_account(&account).await.unwrap();

        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());
        store
            .insert_messages(&[message("m1"), message("m2")], 999)
            .await
            .unwrap();

        let stats = processor.tick_at(1000).await.unwrap();
        assert_eq!(stats.sent, 1);
        // The rest stays pending for the next tick.
        let stats = processor.tick_at(1001).await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn test_record_bounce_correlates_by_client_id() {
        let store = seeded_store().await;
        let transport = MockTransport::new();
        let processor = processor(store.clone(), transport.clone());
        let inserted = store.insert_messages(&[message("m1")], 999).await.unwrap();

        let info = BounceInfo {
            bounce_type: "hard".to_string(),
            bounce_code: Some("550".to_string()),
            reason: Some("User unknown".to_string()),
            ts: 2000,
        };
        assert!(processor.record_bounce("m1", &info).await.unwrap());
        assert!(!processor.record_bounce("nope", &info).await.unwrap());

        let events = store.list_events(&inserted[0].pk).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Bounce);
        assert_eq!(
            events[0].metadata.as_ref().unwrap()["bounce_type"],
            "hard"
        );
    }
}
