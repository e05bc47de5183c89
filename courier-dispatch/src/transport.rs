//! SMTP transaction execution over the connection pool.
//!
//! [`MailTransport`] is the seam between the dispatch loop and the wire:
//! production uses [`SmtpTransport`] (pool + SMTP transaction), tests plug in
//! a recording mock the way the original suite stubbed its pool.

use std::time::Duration;

use async_trait::async_trait;
use courier_smtp::{ConnectSettings, SmtpClient, SmtpPool, TcpConnector};
use courier_store::Account;
use serde::Deserialize;

use crate::error::SendError;

/// Per-command deadlines for the mail transaction.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SmtpTimeouts {
    #[serde(default = "defaults::mail_from_secs")]
    pub mail_from_secs: u64,
    #[serde(default = "defaults::rcpt_to_secs")]
    pub rcpt_to_secs: u64,
    #[serde(default = "defaults::data_secs")]
    pub data_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            mail_from_secs: defaults::mail_from_secs(),
            rcpt_to_secs: defaults::rcpt_to_secs(),
            data_secs: defaults::data_secs(),
        }
    }
}

mod defaults {
    pub const fn mail_from_secs() -> u64 {
        30
    }

    pub const fn rcpt_to_secs() -> u64 {
        30
    }

    pub const fn data_secs() -> u64 {
        120
    }
}

/// Delivers one built message through an account's SMTP server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Perform the full mail transaction. `data` is the complete message
    /// text including headers.
    async fn send(
        &self,
        account: &Account,
        mail_from: &str,
        rcpt_to: &[String],
        data: &str,
    ) -> std::result::Result<(), SendError>;

    /// Close idle connections past their TTL. Called on a timer.
    async fn cleanup(&self);

    /// Drain the pool and reject further work.
    async fn shutdown(&self);
}

/// Production transport: bounded pool, one transaction per send.
pub struct SmtpTransport {
    pool: SmtpPool<TcpConnector>,
    timeouts: SmtpTimeouts,
    acquire_timeout: Duration,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(pool: SmtpPool<TcpConnector>, timeouts: SmtpTimeouts) -> Self {
        Self {
            pool,
            timeouts,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

fn connect_settings(account: &Account) -> ConnectSettings {
    ConnectSettings {
        host: account.host.clone(),
        port: account.port,
        user: account.user.clone(),
        password: account.password.clone(),
        use_tls: account.use_tls,
        ttl: Duration::from_secs(u64::from(account.ttl_seconds)),
    }
}

async fn timed<T>(
    seconds: u64,
    what: &str,
    future: impl Future<Output = courier_smtp::error::Result<T>>,
) -> std::result::Result<T, SendError> {
    tokio::time::timeout(Duration::from_secs(seconds), future)
        .await
        .map_err(|_| SendError::Timeout(format!("{what} timed out after {seconds}s")))?
        .map_err(SendError::from)
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(
        &self,
        account: &Account,
        mail_from: &str,
        rcpt_to: &[String],
        data: &str,
    ) -> std::result::Result<(), SendError> {
        let settings = connect_settings(account);
        let mut conn = self
            .pool
            .acquire(&settings, self.acquire_timeout)
            .await
            .map_err(SendError::from)?;

        match transaction(&mut conn, self.timeouts, mail_from, rcpt_to, data).await {
            Ok(()) => {
                self.pool.release(conn).await;
                Ok(())
            }
            // A failed transaction leaves the session in an unknown state;
            // dropping the connection closes it and frees the slot.
            Err(e) => Err(e),
        }
    }

    async fn cleanup(&self) {
        self.pool.cleanup().await;
    }

    async fn shutdown(&self) {
        self.pool.close_all().await;
    }
}

/// MAIL FROM, RCPT TO for every recipient, DATA, then the payload. Failure
/// codes surface as [`SendError::Smtp`] and are classified by the retry
/// strategy.
async fn transaction(
    client: &mut courier_smtp::PooledConnection<SmtpClient>,
    timeouts: SmtpTimeouts,
    mail_from: &str,
    rcpt_to: &[String],
    data: &str,
) -> std::result::Result<(), SendError> {
    let response = timed(timeouts.mail_from_secs, "MAIL FROM", client.mail_from(mail_from)).await?;
    if !response.is_success() {
        return Err(SendError::Smtp {
            code: response.code,
            message: format!("server rejected MAIL FROM: {}", response.message()),
        });
    }

    for recipient in rcpt_to {
        let response =
            timed(timeouts.rcpt_to_secs, "RCPT TO", client.rcpt_to(recipient)).await?;
        if !response.is_success() {
            return Err(SendError::Smtp {
                code: response.code,
                message: format!("server rejected RCPT TO {recipient}: {}", response.message()),
            });
        }
    }

    let response = timed(timeouts.data_secs, "DATA", client.data()).await?;
    if !response.is_intermediate() {
        return Err(SendError::Smtp {
            code: response.code,
            message: format!("server rejected DATA: {}", response.message()),
        });
    }

    let response = timed(timeouts.data_secs, "message data", client.send_data(data)).await?;
    if !response.is_success() {
        return Err(SendError::Smtp {
            code: response.code,
            message: format!("server rejected message data: {}", response.message()),
        });
    }

    Ok(())
}
