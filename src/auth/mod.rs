//! Connection identity issuance and authorization
//!
//! Every client obtains an identity (connection id + secret) before any other
//! interaction; subsequent requests are authorized against it.

pub mod provider;

// Re-export commonly used types
pub use provider::{AuthorizationResult, ConnectionIdProvider, Identity, MemoryConnectionIdProvider};
