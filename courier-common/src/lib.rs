pub mod auth;
pub mod logging;
pub mod time;

pub use auth::ClientAuth;
pub use tracing;

/// Control signal broadcast to every long-running task.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
