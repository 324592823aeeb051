//! The message dispatcher
//!
//! Handlers are consulted in registration order and the first one whose
//! `can_handle` returns true receives the request. Authentication happens
//! before dispatch for handlers that require it.

use crate::auth::{AuthorizationResult, ConnectionIdProvider, Identity};
use crate::dispatch::session::{Session, SourceAddress};
use crate::error::{MatchmakingError, Result};
use crate::handlers::RequestHandler;
use crate::messages::{Request, Response};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

/// Routes requests to handlers and enforces authentication
pub struct MessageDispatcher {
    connection_id_provider: Arc<dyn ConnectionIdProvider>,
    handlers: RwLock<Vec<Arc<dyn RequestHandler>>>,
}

impl MessageDispatcher {
    pub fn new(connection_id_provider: Arc<dyn ConnectionIdProvider>) -> Self {
        Self {
            connection_id_provider,
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn connection_id_provider(&self) -> &Arc<dyn ConnectionIdProvider> {
        &self.connection_id_provider
    }

    /// Append a handler to the dispatch order
    ///
    /// Re-registering a handler with a name that is already present is a
    /// no-op, so the dispatch order cannot be corrupted by double setup.
    pub fn register_handler(&self, handler: Arc<dyn RequestHandler>) {
        let mut handlers = self.handlers.write().expect("handler list poisoned");
        if handlers.iter().any(|h| h.name() == handler.name()) {
            warn!("Handler {} is already registered, ignoring", handler.name());
            return;
        }
        debug!("Registering handler {}", handler.name());
        handlers.push(handler);
    }

    pub fn is_handler_registered(&self, name: &str) -> bool {
        let handlers = self.handlers.read().expect("handler list poisoned");
        handlers.iter().any(|h| h.name() == name)
    }

    /// Remove a handler by name, returning whether it was present
    pub fn remove_handler(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write().expect("handler list poisoned");
        let before = handlers.len();
        handlers.retain(|h| h.name() != name);
        handlers.len() != before
    }

    pub fn remove_all_handlers(&self) {
        let mut handlers = self.handlers.write().expect("handler list poisoned");
        handlers.clear();
    }

    /// Dispatch a request to the first handler that claims it
    ///
    /// Returns `Ok(None)` when no handler claims the request. For handlers
    /// that require authentication, the caller's credentials are checked
    /// first and a failure short-circuits to the matching error response.
    pub fn dispatch(
        &self,
        request: &Request,
        source: &SourceAddress,
        session: Option<&Arc<dyn Session>>,
    ) -> Result<Option<Response>> {
        let handler = {
            let handlers = self.handlers.read().expect("handler list poisoned");
            handlers
                .iter()
                .find(|h| h.can_handle(request))
                .map(Arc::clone)
        };
        let Some(handler) = handler else {
            debug!("No handler claimed the request");
            return Ok(None);
        };
        debug!("Dispatching request to handler {}", handler.name());

        if handler.needs_authentication(request) {
            let candidate = Identity {
                connection_id: request.connection_id().to_string(),
                secret: request.password().to_string(),
            };
            match self.connection_id_provider.is_authorized(&candidate)? {
                AuthorizationResult::NotFound => {
                    return Ok(Some(Response::unknown_connection_id()));
                }
                AuthorizationResult::NotAuthorized => {
                    return Ok(Some(Response::not_authorized()));
                }
                AuthorizationResult::Authorized => {}
            }
        }

        handler.handle(request, source, session).map(Some)
    }

    /// Like [`MessageDispatcher::dispatch`], but never fails: errors and
    /// unclaimed requests become error responses
    pub fn dispatch_or_create_error(
        &self,
        request: &Request,
        source: &SourceAddress,
        session: Option<&Arc<dyn Session>>,
    ) -> Response {
        match self.dispatch(request, source, session) {
            Ok(Some(response)) => response,
            Ok(None) => Response::internal_server_error("No response generated by server"),
            Err(err) => match err.downcast_ref::<MatchmakingError>() {
                Some(MatchmakingError::BadRequest { reason }) => {
                    Response::bad_request(reason.clone())
                }
                Some(MatchmakingError::NotAllowed { reason }) => {
                    Response::not_allowed(reason.clone())
                }
                _ => {
                    error!("Request handling failed: {:#}", err);
                    Response::internal_server_error(err.to_string())
                }
            },
        }
    }

    /// Tell interested handlers that a client session has gone away
    pub fn dispatch_session_closed(&self, session: &Arc<dyn Session>) {
        let handlers = {
            let handlers = self.handlers.read().expect("handler list poisoned");
            handlers
                .iter()
                .filter(|h| h.wants_session_notifications())
                .map(Arc::clone)
                .collect::<Vec<_>>()
        };
        for handler in handlers {
            handler.on_session_closed(session);
        }
    }
}

impl std::fmt::Debug for MessageDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self
            .handlers
            .read()
            .map(|handlers| handlers.iter().map(|h| h.name()).collect())
            .unwrap_or_default();
        f.debug_struct("MessageDispatcher")
            .field("handlers", &names)
            .finish()
    }
}
