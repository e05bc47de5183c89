//! Durable relational store for the relay
//!
//! Single source of truth for tenants, accounts, messages, message events and
//! the send log. Every state transition of a message goes through this crate,
//! and every multi-table mutation that describes one message (terminal event +
//! processed timestamp, deferral + deferral event) executes in one
//! transaction.
//!
//! The event log is the authoritative record; the `smtp_ts`/`deferred_ts`
//! columns on messages are materialized shortcuts kept in sync inside the
//! same write so `fetch_ready` stays a cheap indexed scan.

pub mod account;
pub mod error;
pub mod event;
pub mod message;
pub mod schema;
pub mod secrets;
pub mod send_log;
pub mod store;
pub mod tenant;

pub use account::{Account, LimitBehavior};
pub use error::{Result, StoreError};
pub use event::{EventType, MessageEvent, UnreportedEvent};
pub use message::{
    Attachment, FetchMode, InsertedMessage, MessagePayload, NewMessage, ReadyMessage,
};
pub use secrets::{PlaintextSecrets, SecretsProvider};
pub use store::{QueueCounts, Store};
pub use tenant::Tenant;
