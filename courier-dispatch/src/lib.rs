//! Dispatch engine: drains ready messages from the store and delivers them
//! over SMTP.
//!
//! One tick reads the ready batch, applies per-account rate plans, builds the
//! MIME envelope, sends through the connection pool and records exactly one
//! outcome event per message. Per-message failures never abort the tick.

pub mod attachments;
pub mod error;
pub mod mime;
pub mod processor;
pub mod rate_limit;
pub mod retry;
pub mod transport;

pub use attachments::{AttachmentError, AttachmentFetcher, LocalFetcher};
pub use error::{DispatchError, SendError};
pub use processor::{BounceInfo, DispatchConfig, DispatchProcessor, TickStats};
pub use rate_limit::{RateLimiter, RatePlan};
pub use retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAYS, RetryStrategy};
pub use transport::{MailTransport, SmtpTimeouts, SmtpTransport};

/// Header carrying the client-facing message id for bounce correlation.
pub const MAIL_ID_HEADER: &str = "X-Courier-Mail-ID";
