//! In-game handlers: host queue, game start and game state

use crate::dispatch::session::{Session, SourceAddress};
use crate::error::{MatchmakingError, Result};
use crate::handlers::RequestHandler;
use crate::messages::{Request, Response};
use crate::store::{RoomStore, RoomTransaction};
use std::sync::Arc;
use tracing::info;

fn open_room_transaction(
    room_store: &Arc<dyn RoomStore>,
    room_id: &str,
) -> Result<RoomTransaction> {
    room_store
        .begin_transaction(room_id)?
        .ok_or_else(|| {
            MatchmakingError::BadRequest {
                reason: format!("No room with id {}", room_id),
            }
            .into()
        })
}

fn require_host(transaction: &RoomTransaction, connection_id: &str) -> Result<()> {
    if transaction.room().host_connection_id() != connection_id {
        return Err(MatchmakingError::NotAllowed {
            reason: "Only the host of a room may perform this action".to_string(),
        }
        .into());
    }
    Ok(())
}

/// Appends client payloads to a room's host queue
pub struct SendDataToHostHandler {
    room_store: Arc<dyn RoomStore>,
}

impl SendDataToHostHandler {
    pub fn new(room_store: Arc<dyn RoomStore>) -> Self {
        Self { room_store }
    }
}

impl RequestHandler for SendDataToHostHandler {
    fn name(&self) -> &'static str {
        "SendDataToHostHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::SendDataToHost(_))
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
        let Request::SendDataToHost(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };
        if request.data_to_host.is_empty() {
            return Err(MatchmakingError::BadRequest {
                reason: "data_to_host must not be empty".to_string(),
            }
            .into());
        }

        let mut transaction = open_room_transaction(&self.room_store, &request.room_id)?;
        for data in &request.data_to_host {
            transaction.room_mut().append_data_for_host(data.clone());
        }
        transaction.commit()?;

        Ok(Response::RoomActionConfirmed {
            room_id: request.room_id.clone(),
        })
    }
}

/// Marks a room's game as started, host only
pub struct StartGameHandler {
    room_store: Arc<dyn RoomStore>,
}

impl StartGameHandler {
    pub fn new(room_store: Arc<dyn RoomStore>) -> Self {
        Self { room_store }
    }
}

impl RequestHandler for StartGameHandler {
    fn name(&self) -> &'static str {
        "StartGameHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::StartGame(_))
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
        let Request::StartGame(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };

        let mut transaction = open_room_transaction(&self.room_store, &request.room_id)?;
        require_host(&transaction, &request.connection_id)?;
        transaction.room_mut().set_game_started(true);
        transaction.commit()?;
        info!("Game started in room {}", request.room_id);

        Ok(Response::RoomActionConfirmed {
            room_id: request.room_id.clone(),
        })
    }
}

/// Replaces a room's game state and drains processed host-queue entries,
/// host only
pub struct UpdateGameStateHandler {
    room_store: Arc<dyn RoomStore>,
}

impl UpdateGameStateHandler {
    pub fn new(room_store: Arc<dyn RoomStore>) -> Self {
        Self { room_store }
    }
}

impl RequestHandler for UpdateGameStateHandler {
    fn name(&self) -> &'static str {
        "UpdateGameStateHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::UpdateGameState(_))
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
        let Request::UpdateGameState(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };

        let mut transaction = open_room_transaction(&self.room_store, &request.room_id)?;
        require_host(&transaction, &request.connection_id)?;

        transaction
            .room_mut()
            .set_game_state(request.game_state.clone());

        // Each processed entry removes the first queue entry equal to it;
        // entries the host never saw stay queued.
        for processed in &request.processed_data {
            let position = transaction
                .room()
                .data_to_be_sent_to_host()
                .iter()
                .position(|queued| queued == processed);
            if let Some(index) = position {
                transaction.room_mut().remove_data_for_host(index);
            }
        }
        transaction.commit()?;

        Ok(Response::RoomActionConfirmed {
            room_id: request.room_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{SendDataToHostRequest, StartGameRequest, UpdateGameStateRequest};
    use crate::store::InMemoryRoomStore;
    use crate::types::GameData;

    fn create_test_store_with_room() -> (Arc<dyn RoomStore>, String) {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let room = store
            .create_room("host0001".to_string(), None, None, 1, 4)
            .unwrap();
        (store, room.id)
    }

    #[test]
    fn test_send_data_to_host_appends() {
        let (store, room_id) = create_test_store_with_room();
        let handler = SendDataToHostHandler::new(store.clone());

        let mut payload = GameData::new("user0002".to_string());
        payload.insert("move".to_string(), serde_json::json!("e4"));
        let response = handler
            .handle(
                &Request::SendDataToHost(SendDataToHostRequest {
                    connection_id: "user0002".to_string(),
                    password: "secret".to_string(),
                    room_id: room_id.clone(),
                    data_to_host: vec![payload.clone()],
                }),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        assert_eq!(
            response,
            Response::RoomActionConfirmed {
                room_id: room_id.clone()
            }
        );
        assert_eq!(
            store.get_room(&room_id).unwrap().unwrap().data_to_be_sent_to_host,
            vec![payload]
        );
    }

    #[test]
    fn test_send_empty_data_is_rejected() {
        let (store, room_id) = create_test_store_with_room();
        let handler = SendDataToHostHandler::new(store);

        let result = handler.handle(
            &Request::SendDataToHost(SendDataToHostRequest {
                connection_id: "user0002".to_string(),
                password: "secret".to_string(),
                room_id,
                data_to_host: Vec::new(),
            }),
            &SourceAddress::unknown(),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_start_game_is_host_only() {
        let (store, room_id) = create_test_store_with_room();
        let handler = StartGameHandler::new(store.clone());

        let denied = handler.handle(
            &Request::StartGame(StartGameRequest {
                connection_id: "user0002".to_string(),
                password: "secret".to_string(),
                room_id: room_id.clone(),
            }),
            &SourceAddress::unknown(),
            None,
        );
        assert!(denied.is_err());
        assert!(!store.get_room(&room_id).unwrap().unwrap().game_started);

        handler
            .handle(
                &Request::StartGame(StartGameRequest {
                    connection_id: "host0001".to_string(),
                    password: "secret".to_string(),
                    room_id: room_id.clone(),
                }),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();
        assert!(store.get_room(&room_id).unwrap().unwrap().game_started);
    }

    #[test]
    fn test_update_game_state_drains_processed_entries() {
        let (store, room_id) = create_test_store_with_room();

        let mut processed = GameData::new("user0002".to_string());
        processed.insert("n".to_string(), serde_json::json!(1));
        let mut pending = GameData::new("user0002".to_string());
        pending.insert("n".to_string(), serde_json::json!(2));
        let mut transaction = store.begin_transaction(&room_id).unwrap().unwrap();
        transaction.room_mut().append_data_for_host(processed.clone());
        transaction.room_mut().append_data_for_host(pending.clone());
        transaction.commit().unwrap();

        let mut game_state = GameData::new("host0001".to_string());
        game_state.insert("turn".to_string(), serde_json::json!(2));
        let handler = UpdateGameStateHandler::new(store.clone());
        handler
            .handle(
                &Request::UpdateGameState(UpdateGameStateRequest {
                    connection_id: "host0001".to_string(),
                    password: "secret".to_string(),
                    room_id: room_id.clone(),
                    game_state: game_state.clone(),
                    processed_data: vec![processed],
                }),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap();

        let room = store.get_room(&room_id).unwrap().unwrap();
        assert_eq!(room.game_state, game_state);
        assert_eq!(room.data_to_be_sent_to_host, vec![pending]);
    }

    #[test]
    fn test_unknown_room_is_bad_request() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = StartGameHandler::new(store);

        let error = handler
            .handle(
                &Request::StartGame(StartGameRequest {
                    connection_id: "host0001".to_string(),
                    password: "secret".to_string(),
                    room_id: "missing1".to_string(),
                }),
                &SourceAddress::unknown(),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::BadRequest { .. })
        ));
    }
}
