//! Request handlers
//!
//! Each handler claims a subset of the request enum via `can_handle` and
//! produces exactly one response per request. Handlers are stateless apart
//! from the stores they share.

pub mod connection;
pub mod game;
pub mod room;
pub mod subscription;

pub use connection::{DisconnectHandler, GetConnectionIdHandler};
pub use game::{SendDataToHostHandler, StartGameHandler, UpdateGameStateHandler};
pub use room::{DestroyRoomHandler, GetRoomDataHandler, JoinOrCreateRoomHandler};
pub use subscription::SubscribeToRoomHandler;

use crate::dispatch::session::{Session, SourceAddress};
use crate::error::Result;
use crate::messages::{Request, Response};
use std::sync::Arc;

/// A unit of request processing the dispatcher can route to
pub trait RequestHandler: Send + Sync {
    /// Unique name used for registration bookkeeping
    fn name(&self) -> &'static str;

    /// Whether this handler processes the given request
    fn can_handle(&self, request: &Request) -> bool;

    /// Whether the dispatcher must authenticate the caller first
    fn needs_authentication(&self, request: &Request) -> bool;

    /// Whether this handler wants to hear about closed sessions
    fn wants_session_notifications(&self) -> bool {
        false
    }

    /// Process a request this handler claimed
    fn handle(
        &self,
        request: &Request,
        source: &SourceAddress,
        session: Option<&Arc<dyn Session>>,
    ) -> Result<Response>;

    /// Called when a client session goes away, if
    /// [`RequestHandler::wants_session_notifications`] returns true
    fn on_session_closed(&self, _session: &Arc<dyn Session>) {}
}
