//! Bounded per-account SMTP connection pool.
//!
//! Connections are bucketed by `(host, port, user)`. Each bucket holds at
//! most `max_per_account` live connections; callers beyond that wait FIFO on
//! the bucket's semaphore until a slot frees or their timeout expires. Idle
//! connections are health-probed (NOOP) on release and expired by age.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::{
    client::{ConnectSettings, SmtpClient},
    error::{ClientError, PoolError},
};

/// Default cap on live connections per account bucket.
const DEFAULT_MAX_PER_ACCOUNT: usize = 5;

/// Default timeout for establishing a new connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the NOOP health probe on release.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health and teardown hooks the pool needs from a connection.
#[async_trait]
pub trait Probe: Send {
    /// Lightweight liveness check. Failures are never surfaced; an unhealthy
    /// connection is simply closed.
    async fn probe(&mut self) -> bool;

    /// Best-effort orderly close.
    async fn close(&mut self);
}

#[async_trait]
impl Probe for SmtpClient {
    async fn probe(&mut self) -> bool {
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, self.noop()).await,
            Ok(Ok(response)) if response.is_success()
        )
    }

    async fn close(&mut self) {
        let _ = tokio::time::timeout(PROBE_TIMEOUT, self.quit()).await;
    }
}

/// Factory for new connections; the seam that lets tests run the pool
/// without a live server.
#[async_trait]
pub trait SmtpConnector: Send + Sync + 'static {
    type Conn: Probe + Send + 'static;

    async fn connect(
        &self,
        settings: &ConnectSettings,
    ) -> std::result::Result<Self::Conn, ClientError>;
}

/// Production connector: TCP + TLS + EHLO + AUTH per the settings.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub helo_name: String,
    pub connect_timeout: Duration,
    pub accept_invalid_certs: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            helo_name: "courier".to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

#[async_trait]
impl SmtpConnector for TcpConnector {
    type Conn = SmtpClient;

    async fn connect(
        &self,
        settings: &ConnectSettings,
    ) -> std::result::Result<Self::Conn, ClientError> {
        SmtpClient::establish(
            settings,
            &self.helo_name,
            self.connect_timeout,
            self.accept_invalid_certs,
        )
        .await
    }
}

struct IdleConnection<T> {
    conn: T,
    created: Instant,
    ttl: Duration,
}

impl<T> IdleConnection<T> {
    fn expired(&self) -> bool {
        self.created.elapsed() >= self.ttl
    }
}

/// A checked-out connection. Holds its bucket slot until released or dropped.
pub struct PooledConnection<T: Probe> {
    conn: Option<T>,
    key: String,
    created: Instant,
    ttl: Duration,
    _permit: OwnedSemaphorePermit,
}

impl<T: Probe> PooledConnection<T> {
    /// Seconds the underlying connection has been alive.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }
}

impl<T: Probe> std::fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("created", &self.created)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<T: Probe> std::ops::Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.conn.as_ref().expect("connection taken")
    }
}

impl<T: Probe> std::ops::DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("connection taken")
    }
}

/// The pool itself, generic over its connector.
pub struct SmtpPool<C: SmtpConnector = TcpConnector> {
    connector: C,
    max_per_account: usize,
    idle: Mutex<HashMap<String, Vec<IdleConnection<C::Conn>>>>,
    limits: DashMap<String, Arc<Semaphore>>,
    closed: AtomicBool,
}

impl Default for SmtpPool<TcpConnector> {
    fn default() -> Self {
        Self::new(TcpConnector::default(), DEFAULT_MAX_PER_ACCOUNT)
    }
}

impl<C: SmtpConnector> SmtpPool<C> {
    #[must_use]
    pub fn new(connector: C, max_per_account: usize) -> Self {
        Self {
            connector,
            max_per_account: max_per_account.max(1),
            idle: Mutex::new(HashMap::new()),
            limits: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn semaphore(&self, key: &str) -> Arc<Semaphore> {
        self.limits
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_account)))
            .clone()
    }

    /// Check out a connection for the given settings.
    ///
    /// Reuses an idle connection when one is healthy and young enough,
    /// creates a new one while the bucket has room, and otherwise waits
    /// (FIFO) until a slot frees or `acquire_timeout` elapses.
    pub async fn acquire(
        &self,
        settings: &ConnectSettings,
        acquire_timeout: Duration,
    ) -> std::result::Result<PooledConnection<C::Conn>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let key = settings.pool_key();
        let semaphore = self.semaphore(&key);

        let permit = tokio::time::timeout(acquire_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| PoolError::Timeout)?
            .map_err(|_| PoolError::Closed)?;

        // Prefer a live idle connection; expired ones are closed on the way.
        loop {
            let idle = {
                let mut buckets = self.idle.lock().await;
                buckets.get_mut(&key).and_then(Vec::pop)
            };

            let Some(mut idle) = idle else { break };
            if idle.expired() {
                idle.conn.close().await;
                continue;
            }

            return Ok(PooledConnection {
                conn: Some(idle.conn),
                key,
                created: idle.created,
                ttl: idle.ttl,
                _permit: permit,
            });
        }

        match self.connector.connect(settings).await {
            Ok(conn) => Ok(PooledConnection {
                conn: Some(conn),
                key,
                created: Instant::now(),
                ttl: settings.ttl,
                _permit: permit,
            }),
            // The permit drops here, freeing the slot for the next waiter.
            Err(e) => Err(PoolError::Connect(e)),
        }
    }

    /// Return a connection to the pool.
    ///
    /// The connection is NOOP-probed; if healthy and younger than its TTL it
    /// goes back to the idle bucket, otherwise it is closed. Probe failures
    /// never surface.
    pub async fn release(&self, mut pooled: PooledConnection<C::Conn>) {
        let Some(mut conn) = pooled.conn.take() else {
            return;
        };

        if self.closed.load(Ordering::SeqCst)
            || pooled.created.elapsed() >= pooled.ttl
            || !conn.probe().await
        {
            conn.close().await;
            return;
        }

        let mut buckets = self.idle.lock().await;
        buckets.entry(pooled.key.clone()).or_default().push(IdleConnection {
            conn,
            created: pooled.created,
            ttl: pooled.ttl,
        });
        // The permit drops with `pooled`, freeing the slot.
    }

    /// Close idle connections whose age reached their TTL. Timer-driven.
    pub async fn cleanup(&self) {
        let mut expired = Vec::new();
        {
            let mut buckets = self.idle.lock().await;
            for bucket in buckets.values_mut() {
                let mut keep = Vec::with_capacity(bucket.len());
                for idle in bucket.drain(..) {
                    if idle.expired() {
                        expired.push(idle);
                    } else {
                        keep.push(idle);
                    }
                }
                *bucket = keep;
            }
            buckets.retain(|_, bucket| !bucket.is_empty());
        }

        let count = expired.len();
        for mut idle in expired {
            idle.conn.close().await;
        }
        if count > 0 {
            tracing::debug!(count, "closed expired idle connections");
        }
    }

    /// Drain every idle connection and reject pending waiters.
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);

        for entry in self.limits.iter() {
            entry.value().close();
        }

        let drained: Vec<_> = {
            let mut buckets = self.idle.lock().await;
            buckets.drain().flat_map(|(_, bucket)| bucket).collect()
        };
        for mut idle in drained {
            idle.conn.close().await;
        }
    }

    /// Number of idle connections currently held, across all buckets.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.values().map(Vec::len).sum()
    }
}
