//! Service orchestration
//!
//! Wires the connection id provider, room store and dispatcher together and
//! runs the background tasks.

pub mod app;

pub use app::{AppState, ServiceError};
