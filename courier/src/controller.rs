//! The `Courier` controller: configuration, task wiring and shutdown.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use courier_common::{Signal, internal, logging};
use courier_control::{ControlAuthConfig, ControlServer, DEFAULT_CONTROL_SOCKET};
use courier_dispatch::{
    DispatchConfig, DispatchProcessor, LocalFetcher, RetryStrategy, SmtpTimeouts, SmtpTransport,
};
use courier_report::{ReportConfig, ReportSynchronizer, SyncClient};
use courier_smtp::{SmtpPool, TcpConnector};
use courier_store::{PlaintextSecrets, Store};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::handler::CourierHandler;

/// Store configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// Path of the SQLite database file.
    #[serde(default = "defaults::db_path")]
    pub path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: defaults::db_path(),
        }
    }
}

/// SMTP pool and transaction configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSection {
    #[serde(default = "defaults::max_per_account")]
    pub max_per_account: usize,
    #[serde(default = "defaults::helo_name")]
    pub helo_name: String,
    #[serde(default = "defaults::connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "defaults::acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Accept invalid TLS certificates; integration testing only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default)]
    pub timeouts: SmtpTimeouts,
}

impl Default for SmtpSection {
    fn default() -> Self {
        Self {
            max_per_account: defaults::max_per_account(),
            helo_name: defaults::helo_name(),
            connect_timeout_secs: defaults::connect_timeout_secs(),
            acquire_timeout_secs: defaults::acquire_timeout_secs(),
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
        }
    }
}

/// Control socket configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlSection {
    #[serde(default = "defaults::socket_path")]
    pub socket_path: String,
    #[serde(default)]
    pub auth: ControlAuthConfig,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            socket_path: defaults::socket_path(),
            auth: ControlAuthConfig::default(),
        }
    }
}

mod defaults {
    pub fn db_path() -> String {
        "courier.db".to_string()
    }

    pub const fn max_per_account() -> usize {
        5
    }

    pub fn helo_name() -> String {
        "courier".to_string()
    }

    pub const fn connect_timeout_secs() -> u64 {
        10
    }

    pub const fn acquire_timeout_secs() -> u64 {
        30
    }

    pub fn socket_path() -> String {
        super::DEFAULT_CONTROL_SOCKET.to_string()
    }
}

/// The whole relay, deserialized from one TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct Courier {
    #[serde(default)]
    store: StoreSection,
    #[serde(alias = "dispatch", default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    retry: RetryStrategy,
    #[serde(alias = "report", default)]
    report: ReportConfig,
    #[serde(alias = "smtp", default)]
    smtp: SmtpSection,
    #[serde(alias = "control", default)]
    control: ControlSection,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("terminate signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Courier {
    /// Parse a controller from TOML configuration text.
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply environment overrides (`COURIER_DB_PATH`, `COURIER_CONTROL_SOCKET`).
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("COURIER_DB_PATH") {
            self.store.path = path;
        }
        if let Ok(path) = std::env::var("COURIER_CONTROL_SOCKET") {
            self.control.socket_path = path;
        }
    }

    /// Run this controller, and everything it controls.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or one of the tasks
    /// fails fatally at startup.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let store = Store::open(&self.store.path, Arc::new(PlaintextSecrets)).await?;
        internal!("store opened at {}", self.store.path);

        let connector = TcpConnector {
            helo_name: self.smtp.helo_name.clone(),
            connect_timeout: Duration::from_secs(self.smtp.connect_timeout_secs),
            accept_invalid_certs: self.smtp.accept_invalid_certs,
        };
        let pool = SmtpPool::new(connector, self.smtp.max_per_account);
        let transport = Arc::new(
            SmtpTransport::new(pool, self.smtp.timeouts)
                .with_acquire_timeout(Duration::from_secs(self.smtp.acquire_timeout_secs)),
        );

        let dispatch = Arc::new(DispatchProcessor::new(
            store.clone(),
            transport,
            Arc::new(LocalFetcher),
            self.dispatch,
            self.retry,
        ));
        let report = Arc::new(ReportSynchronizer::new(
            store.clone(),
            SyncClient::default(),
            self.report,
        ));

        let handler = Arc::new(CourierHandler::new(
            store.clone(),
            dispatch.clone(),
            report.clone(),
        ));
        let control = ControlServer::new(self.control.socket_path, handler, self.control.auth);

        internal!("controller running");

        let ret = tokio::select! {
            r = dispatch.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = report.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = control.serve(SHUTDOWN_BROADCAST.subscribe()) => {
                r.map_err(anyhow::Error::from)
            }
            r = shutdown() => {
                r
            }
        };

        internal!("shutting down...");
        store.close().await;

        ret
    }
}
