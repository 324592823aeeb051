//! Green Room - matchmaking server core for multiplayer games
//!
//! This crate issues connection identities, matches players into game rooms
//! by size and allow/deny constraints, and keeps every room mutation inside
//! a change-tracked transaction over pluggable stores.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use auth::{AuthorizationResult, ConnectionIdProvider, MemoryConnectionIdProvider};
pub use dispatch::{MessageDispatcher, Session, SourceAddress};
pub use store::{InMemoryRoomStore, RoomStore, RoomTransaction, SqliteRoomStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
