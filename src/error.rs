//! Error types for the matchmaking server core
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    /// Caller-supplied input failed validation. The dispatcher maps this
    /// variant to a bad-request response.
    #[error("Bad request: {reason}")]
    BadRequest { reason: String },

    #[error("Room not found: {room_id}")]
    RoomNotFound { room_id: String },

    #[error("Operation not allowed: {reason}")]
    NotAllowed { reason: String },

    #[error("Room store failure: {message}")]
    StoreFailure { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
