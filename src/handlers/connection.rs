//! Connection lifecycle handlers

use crate::auth::ConnectionIdProvider;
use crate::dispatch::session::{Session, SourceAddress};
use crate::error::Result;
use crate::handlers::RequestHandler;
use crate::messages::{Request, Response};
use crate::store::RoomStore;
use crate::types::RoomId;
use std::sync::Arc;
use tracing::info;

/// Issues fresh connection identities
pub struct GetConnectionIdHandler {
    connection_id_provider: Arc<dyn ConnectionIdProvider>,
}

impl GetConnectionIdHandler {
    pub fn new(connection_id_provider: Arc<dyn ConnectionIdProvider>) -> Self {
        Self {
            connection_id_provider,
        }
    }
}

impl RequestHandler for GetConnectionIdHandler {
    fn name(&self) -> &'static str {
        "GetConnectionIdHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::GetConnectionId)
    }

    fn needs_authentication(&self, _request: &Request) -> bool {
        // This is the request that establishes credentials.
        false
    }

    fn handle(
        &self,
        _request: &Request,
        _source: &SourceAddress,
        _session: Option<&Arc<dyn Session>>,
    ) -> Result<Response> {
        let identity = self.connection_id_provider.issue()?;
        info!("Issued connection id {}", identity.connection_id);
        Ok(Response::ConnectionId {
            connection_id: identity.connection_id,
            password: identity.secret,
        })
    }
}

/// Tears down everything a departing client owns or participates in
///
/// Rooms hosted by the caller are deleted; in every other room the caller
/// is merely removed from the member list.
pub struct DisconnectHandler {
    connection_id_provider: Arc<dyn ConnectionIdProvider>,
    room_store: Arc<dyn RoomStore>,
}

impl DisconnectHandler {
    pub fn new(
        connection_id_provider: Arc<dyn ConnectionIdProvider>,
        room_store: Arc<dyn RoomStore>,
    ) -> Self {
        Self {
            connection_id_provider,
            room_store,
        }
    }
}

impl RequestHandler for DisconnectHandler {
    fn name(&self) -> &'static str {
        "DisconnectHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::Disconnect(_))
    }

    fn needs_authentication(&self, _request: &Request) -> bool {
        true
    }

    fn handle(
        &self,
        request: &Request,
        _source: &SourceAddress,
        _session: Option<&Arc<dyn Session>>,
    ) -> Result<Response> {
        let Request::Disconnect(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };
        let connection_id = &request.connection_id;

        let hosted: Vec<RoomId> = self
            .room_store
            .filter_rooms(&|room| &room.host_connection_id == connection_id)?
            .into_iter()
            .map(|room| room.id)
            .collect();
        let member_of: Vec<RoomId> = self
            .room_store
            .filter_rooms(&|room| {
                &room.host_connection_id != connection_id
                    && room
                        .connected_users
                        .iter()
                        .any(|user| &user.connection_id == connection_id)
            })?
            .into_iter()
            .map(|room| room.id)
            .collect();

        let deleted_rooms: Vec<RoomId> = self
            .room_store
            .delete_rooms(&hosted)?
            .into_iter()
            .map(|room| room.id)
            .collect();

        let mut disconnected_rooms = Vec::new();
        for room_id in &member_of {
            let Some(mut transaction) = self.room_store.begin_transaction(room_id)? else {
                continue;
            };
            if transaction.room_mut().remove_user(connection_id) {
                transaction.commit()?;
                disconnected_rooms.push(room_id.clone());
            } else {
                transaction.abort()?;
            }
        }

        self.connection_id_provider.delete(connection_id)?;
        info!(
            "Connection {} disconnected ({} room(s) deleted, left {} room(s))",
            connection_id,
            deleted_rooms.len(),
            disconnected_rooms.len()
        );

        Ok(Response::Disconnect {
            disconnected_rooms,
            deleted_rooms,
        })
    }
}
