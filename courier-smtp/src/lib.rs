//! SMTP client and per-account connection pooling.
//!
//! The client speaks just enough ESMTP for an outbound relay: greeting,
//! EHLO/HELO, STARTTLS and implicit TLS, AUTH LOGIN, the mail transaction
//! commands, and NOOP as the pool's health probe.

pub mod client;
pub mod error;
pub mod pool;
pub mod response;

pub use client::{ConnectSettings, SmtpClient};
pub use error::{ClientError, PoolError};
pub use pool::{PooledConnection, Probe, SmtpConnector, SmtpPool, TcpConnector};
pub use response::Response;
