//! Top-level controller wiring the relay's tasks together.

pub mod controller;
pub mod handler;

pub use controller::{Courier, SHUTDOWN_BROADCAST};
pub use handler::CourierHandler;
