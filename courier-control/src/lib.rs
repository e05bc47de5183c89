//! Control protocol for managing a running relay instance
//!
//! This module provides an IPC mechanism using Unix domain sockets to:
//! - Suspend and resume dispatch, per tenant or per batch code
//! - Trigger immediate dispatch and report cycles
//! - Query queue counters and per-tenant sync state
//!
//! The protocol uses bincode for efficient serialization.

pub mod auth;
pub mod client;
mod codec;
pub mod error;
pub mod protocol;
pub mod server;

pub use auth::ControlAuthConfig;
pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    DispatchCommand, PROTOCOL_VERSION, QueueTotals, ReportCommand, Request, RequestCommand,
    Response, ResponseData, ResponsePayload, StatusReport, SystemCommand, TenantSyncEntry,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/courier.sock";
