//! Room membership handlers

use crate::dispatch::session::{Session, SourceAddress};
use crate::error::Result;
use crate::handlers::RequestHandler;
use crate::messages::{Request, Response, RoomInteractionResult, RoomOperation};
use crate::store::RoomStore;
use crate::types::User;
use std::sync::Arc;
use tracing::info;

/// Joins the caller into an applicable room or creates a fresh one
pub struct JoinOrCreateRoomHandler {
    room_store: Arc<dyn RoomStore>,
}

impl JoinOrCreateRoomHandler {
    pub fn new(room_store: Arc<dyn RoomStore>) -> Self {
        Self { room_store }
    }

    fn try_join(
        &self,
        request: &crate::messages::JoinOrCreateRoomRequest,
        user: &User,
    ) -> Result<Option<Response>> {
        let transaction = self.room_store.find_applicable_room(
            &request.user_name,
            request.whitelist.as_deref(),
            request.blacklist.as_deref(),
            request.min_room_size,
            request.max_room_size,
        )?;
        let Some(mut transaction) = transaction else {
            return Ok(None);
        };

        transaction.room_mut().add_user(user.clone());
        let room_id = transaction.room().id().to_string();
        transaction.commit()?;
        info!("User {} joined room {}", user.user_name, room_id);

        Ok(Some(Response::JoinOrCreateRoom {
            result: RoomInteractionResult::RoomJoined,
            room_id: Some(room_id),
        }))
    }

    fn create(
        &self,
        request: &crate::messages::JoinOrCreateRoomRequest,
        user: &User,
    ) -> Result<Response> {
        let room = self.room_store.create_room(
            request.connection_id.clone(),
            request.whitelist.clone(),
            request.blacklist.clone(),
            request.min_room_size,
            request.max_room_size,
        )?;

        // The creator is also the first connected user.
        let mut transaction = self
            .room_store
            .begin_transaction(&room.id)?
            .ok_or_else(|| crate::error::MatchmakingError::StoreFailure {
                message: format!("Room {} vanished right after creation", room.id),
            })?;
        transaction.room_mut().add_user(user.clone());
        transaction.commit()?;
        info!("User {} created room {}", user.user_name, room.id);

        Ok(Response::JoinOrCreateRoom {
            result: RoomInteractionResult::RoomCreated,
            room_id: Some(room.id),
        })
    }
}

impl RequestHandler for JoinOrCreateRoomHandler {
    fn name(&self) -> &'static str {
        "JoinOrCreateRoomHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::JoinOrCreateRoom(_))
    }

    fn needs_authentication(&self, _request: &Request) -> bool {
        true
    }

    fn handle(
        &self,
        request: &Request,
        source: &SourceAddress,
        _session: Option<&Arc<dyn Session>>,
    ) -> Result<Response> {
        let Request::JoinOrCreateRoom(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };
        let user = User::new(
            request.connection_id.clone(),
            request.user_name.clone(),
            source.ipv4,
            source.ipv6,
        );

        match request.operation {
            RoomOperation::CreateNew => self.create(request, &user),
            RoomOperation::JoinOnly => Ok(self.try_join(request, &user)?.unwrap_or(
                Response::JoinOrCreateRoom {
                    result: RoomInteractionResult::Nothing,
                    room_id: None,
                },
            )),
            RoomOperation::JoinOrCreateNew => match self.try_join(request, &user)? {
                Some(response) => Ok(response),
                None => self.create(request, &user),
            },
        }
    }
}

/// Returns a point-in-time copy of a room
pub struct GetRoomDataHandler {
    room_store: Arc<dyn RoomStore>,
}

impl GetRoomDataHandler {
    pub fn new(room_store: Arc<dyn RoomStore>) -> Self {
        Self { room_store }
    }
}

impl RequestHandler for GetRoomDataHandler {
    fn name(&self) -> &'static str {
        "GetRoomDataHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::GetRoomData(_))
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
        let Request::GetRoomData(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };
        Ok(Response::GetRoomData {
            room: self.room_store.get_room(&request.room_id)?,
        })
    }
}

/// Deletes a room on behalf of its host
pub struct DestroyRoomHandler {
    room_store: Arc<dyn RoomStore>,
}

impl DestroyRoomHandler {
    pub fn new(room_store: Arc<dyn RoomStore>) -> Self {
        Self { room_store }
    }
}

impl RequestHandler for DestroyRoomHandler {
    fn name(&self) -> &'static str {
        "DestroyRoomHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::DestroyRoom(_))
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
        let Request::DestroyRoom(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };

        let Some(room) = self.room_store.get_room(&request.room_id)? else {
            return Ok(Response::DestroyRoom {
                room_destroyed: false,
            });
        };
        if room.host_connection_id != request.connection_id {
            return Ok(Response::not_allowed(
                "Only the host of a room may destroy it",
            ));
        }

        let destroyed = self.room_store.delete_room(&request.room_id)?.is_some();
        if destroyed {
            info!("Room {} destroyed by its host", request.room_id);
        }
        Ok(Response::DestroyRoom {
            room_destroyed: destroyed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{DestroyRoomRequest, JoinOrCreateRoomRequest};
    use crate::store::InMemoryRoomStore;

    fn join_request(
        connection_id: &str,
        user_name: &str,
        operation: RoomOperation,
    ) -> JoinOrCreateRoomRequest {
        JoinOrCreateRoomRequest {
            connection_id: connection_id.to_string(),
            password: "secret".to_string(),
            operation,
            user_name: user_name.to_string(),
            whitelist: None,
            blacklist: None,
            min_room_size: 1,
            max_room_size: 2,
        }
    }

    #[test]
    fn test_create_then_join() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = JoinOrCreateRoomHandler::new(store.clone());

        let created = handler
            .handle(
                &Request::JoinOrCreateRoom(join_request(
                    "user0001",
                    "alice",
                    RoomOperation::JoinOrCreateNew,
                )),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        let Response::JoinOrCreateRoom {
            result: RoomInteractionResult::RoomCreated,
            room_id: Some(room_id),
        } = created
        else {
            panic!("expected a created room, got {:?}", created);
        };

        let joined = handler
            .handle(
                &Request::JoinOrCreateRoom(join_request(
                    "user0002",
                    "bob",
                    RoomOperation::JoinOrCreateNew,
                )),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        assert_eq!(
            joined,
            Response::JoinOrCreateRoom {
                result: RoomInteractionResult::RoomJoined,
                room_id: Some(room_id.clone()),
            }
        );

        let room = store.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.connected_users.len(), 2);
        assert_eq!(room.host_connection_id, "user0001");
    }

    #[test]
    fn test_join_only_without_applicable_room() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = JoinOrCreateRoomHandler::new(store.clone());

        let response = handler
            .handle(
                &Request::JoinOrCreateRoom(join_request(
                    "user0001",
                    "alice",
                    RoomOperation::JoinOnly,
                )),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        assert_eq!(
            response,
            Response::JoinOrCreateRoom {
                result: RoomInteractionResult::Nothing,
                room_id: None,
            }
        );
        assert!(store.all_rooms().unwrap().is_empty());
    }

    #[test]
    fn test_destroy_room_is_host_only() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = DestroyRoomHandler::new(store.clone());
        let room = store
            .create_room("user0001".to_string(), None, None, 1, 4)
            .unwrap();

        let denied = handler
            .handle(
                &Request::DestroyRoom(DestroyRoomRequest {
                    connection_id: "user0002".to_string(),
                    password: "secret".to_string(),
                    room_id: room.id.clone(),
                }),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        assert!(matches!(denied, Response::NotAllowed { .. }));
        assert!(store.contains_room(&room.id).unwrap());

        let allowed = handler
            .handle(
                &Request::DestroyRoom(DestroyRoomRequest {
                    connection_id: "user0001".to_string(),
                    password: "secret".to_string(),
                    room_id: room.id.clone(),
                }),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        assert_eq!(
            allowed,
            Response::DestroyRoom {
                room_destroyed: true
            }
        );
        assert!(!store.contains_room(&room.id).unwrap());
    }

    #[test]
    fn test_destroy_missing_room() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = DestroyRoomHandler::new(store);

        let response = handler
            .handle(
                &Request::DestroyRoom(DestroyRoomRequest {
                    connection_id: "user0001".to_string(),
                    password: "secret".to_string(),
                    room_id: "missing1".to_string(),
                }),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        assert_eq!(
            response,
            Response::DestroyRoom {
                room_destroyed: false
            }
        );
    }
}
