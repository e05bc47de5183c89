//! Control protocol types and serialization

use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// Bearer token, required when the server has auth enabled
    pub auth_token: Option<String>,
    /// The actual command to execute
    pub command: RequestCommand,
}

impl Request {
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            auth_token: None,
            command,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }
}

/// Request command types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    /// System management commands
    System(SystemCommand),
    /// Dispatch queue commands
    Dispatch(DispatchCommand),
    /// Report synchronizer commands
    Report(ReportCommand),
}

/// System management commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Health check / ping
    Ping,
    /// Get queue counters and per-tenant sync state
    Status,
}

/// Dispatch queue commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchCommand {
    /// Pause dispatch. Without a tenant the whole loop pauses; with one,
    /// only that tenant's messages (optionally one batch code) are held.
    Suspend {
        tenant_id: Option<String>,
        batch_code: Option<String>,
    },
    /// Undo a matching suspend
    Activate {
        tenant_id: Option<String>,
        batch_code: Option<String>,
    },
    /// Run a dispatch tick immediately
    RunNow,
}

/// Report synchronizer commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReportCommand {
    /// Run a sync cycle immediately; with a tenant, reset its DND window and
    /// process only that tenant
    RunNow { tenant_id: Option<String> },
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

impl Response {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }
}

/// Response payload types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Command succeeded
    Ok,
    /// Command succeeded with data
    Data(Box<ResponseData>),
    /// Command failed with error message
    Error(String),
}

/// Response data types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// Full status report
    Status(StatusReport),
    /// Simple string message
    Message(String),
}

/// Aggregate queue counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueTotals {
    pub pending: i64,
    pub deferred: i64,
    pub processed: i64,
}

/// Per-tenant sync state as seen by the synchronizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSyncEntry {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub last_sync_ts: Option<i64>,
    pub in_dnd: bool,
    pub next_sync_due: bool,
}

/// System status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Whether the dispatch loop is globally active
    pub dispatch_active: bool,
    /// Queue counters
    pub queue: QueueTotals,
    /// Suspended tenants and their batch codes (`"*"` = whole tenant)
    pub suspended: Vec<(String, Vec<String>)>,
    /// Per-tenant sync state
    pub tenants: Vec<TenantSyncEntry>,
    /// Heartbeat interval for tenant syncs, in seconds
    pub sync_interval_seconds: i64,
}
