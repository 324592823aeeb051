//! Request dispatching
//!
//! The dispatcher authenticates incoming requests and routes each one to
//! the first registered handler that claims it.

pub mod dispatcher;
pub mod session;

pub use dispatcher::MessageDispatcher;
pub use session::{Session, SourceAddress};
