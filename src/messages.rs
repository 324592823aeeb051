//! Request and response wire types
//!
//! Messages are tagged JSON objects. Every request except
//! `GetConnectionId` carries the caller's connection id and password,
//! which the dispatcher checks before a handler sees the request.

use crate::types::{ConnectionId, GameData, Room, RoomId};
use serde::{Deserialize, Serialize};

/// What a join-or-create request is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomOperation {
    /// Join an applicable room, create one if none exists
    JoinOrCreateNew,
    /// Join only; respond with `Nothing` when no room is applicable
    JoinOnly,
    /// Always create a new room
    CreateNew,
}

/// How a join-or-create request was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomInteractionResult {
    RoomJoined,
    RoomCreated,
    Nothing,
}

fn default_min_room_size() -> u32 {
    1
}

fn default_max_room_size() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOrCreateRoomRequest {
    pub connection_id: ConnectionId,
    pub password: String,
    pub operation: RoomOperation,
    pub user_name: String,
    #[serde(default)]
    pub whitelist: Option<Vec<String>>,
    #[serde(default)]
    pub blacklist: Option<Vec<String>>,
    #[serde(default = "default_min_room_size")]
    pub min_room_size: u32,
    #[serde(default = "default_max_room_size")]
    pub max_room_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRoomDataRequest {
    pub connection_id: ConnectionId,
    pub password: String,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendDataToHostRequest {
    pub connection_id: ConnectionId,
    pub password: String,
    pub room_id: RoomId,
    pub data_to_host: Vec<GameData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartGameRequest {
    pub connection_id: ConnectionId,
    pub password: String,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateGameStateRequest {
    pub connection_id: ConnectionId,
    pub password: String,
    pub room_id: RoomId,
    pub game_state: GameData,
    /// Host-queue entries the host has consumed; removed on success
    #[serde(default)]
    pub processed_data: Vec<GameData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestroyRoomRequest {
    pub connection_id: ConnectionId,
    pub password: String,
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectRequest {
    pub connection_id: ConnectionId,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeToRoomRequest {
    pub connection_id: ConnectionId,
    pub password: String,
    pub room_id: RoomId,
}

/// Every request a client can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    GetConnectionId,
    JoinOrCreateRoom(JoinOrCreateRoomRequest),
    GetRoomData(GetRoomDataRequest),
    SendDataToHost(SendDataToHostRequest),
    StartGame(StartGameRequest),
    UpdateGameState(UpdateGameStateRequest),
    DestroyRoom(DestroyRoomRequest),
    Disconnect(DisconnectRequest),
    SubscribeToRoom(SubscribeToRoomRequest),
}

impl Request {
    /// The caller's connection id; empty for `GetConnectionId`
    pub fn connection_id(&self) -> &str {
        match self {
            Request::GetConnectionId => "",
            Request::JoinOrCreateRoom(request) => &request.connection_id,
            Request::GetRoomData(request) => &request.connection_id,
            Request::SendDataToHost(request) => &request.connection_id,
            Request::StartGame(request) => &request.connection_id,
            Request::UpdateGameState(request) => &request.connection_id,
            Request::DestroyRoom(request) => &request.connection_id,
            Request::Disconnect(request) => &request.connection_id,
            Request::SubscribeToRoom(request) => &request.connection_id,
        }
    }

    /// The caller's password; empty for `GetConnectionId`
    pub fn password(&self) -> &str {
        match self {
            Request::GetConnectionId => "",
            Request::JoinOrCreateRoom(request) => &request.password,
            Request::GetRoomData(request) => &request.password,
            Request::SendDataToHost(request) => &request.password,
            Request::StartGame(request) => &request.password,
            Request::UpdateGameState(request) => &request.password,
            Request::DestroyRoom(request) => &request.password,
            Request::Disconnect(request) => &request.password,
            Request::SubscribeToRoom(request) => &request.password,
        }
    }
}

/// Every response the server can send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    ConnectionId {
        connection_id: ConnectionId,
        password: String,
    },
    JoinOrCreateRoom {
        result: RoomInteractionResult,
        room_id: Option<RoomId>,
    },
    GetRoomData {
        room: Option<Room>,
    },
    /// Acknowledges SendDataToHost, StartGame and UpdateGameState
    RoomActionConfirmed {
        room_id: RoomId,
    },
    DestroyRoom {
        room_destroyed: bool,
    },
    Disconnect {
        disconnected_rooms: Vec<RoomId>,
        deleted_rooms: Vec<RoomId>,
    },
    SubscribeToRoom {
        room_id: RoomId,
    },
    UnknownConnectionId {
        message: String,
    },
    NotAuthorized {
        message: String,
    },
    NotAllowed {
        message: String,
    },
    BadRequest {
        message: String,
    },
    InternalServerError {
        message: String,
    },
}

impl Response {
    pub fn unknown_connection_id() -> Self {
        Response::UnknownConnectionId {
            message: "The specified connection id is not known to the server".to_string(),
        }
    }

    pub fn not_authorized() -> Self {
        Response::NotAuthorized {
            message: "Incorrect password".to_string(),
        }
    }

    pub fn not_allowed<S: Into<String>>(message: S) -> Self {
        Response::NotAllowed {
            message: message.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Response::BadRequest {
            message: message.into(),
        }
    }

    pub fn internal_server_error<S: Into<String>>(message: S) -> Self {
        Response::InternalServerError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagging() {
        let request = Request::GetRoomData(GetRoomDataRequest {
            connection_id: "user0001".to_string(),
            password: "secret".to_string(),
            room_id: "abcd1234".to_string(),
        });
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "GetRoomData");
        assert_eq!(json["room_id"], "abcd1234");

        let parsed: Request = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_join_request_defaults() {
        let json = serde_json::json!({
            "type": "JoinOrCreateRoom",
            "connection_id": "user0001",
            "password": "secret",
            "operation": "JoinOrCreateNew",
            "user_name": "alice",
        });
        let Request::JoinOrCreateRoom(request) = serde_json::from_value(json).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(request.min_room_size, 1);
        assert_eq!(request.max_room_size, 2);
        assert!(request.whitelist.is_none());
        assert!(request.blacklist.is_none());
    }

    #[test]
    fn test_credentials_accessors() {
        let request = Request::Disconnect(DisconnectRequest {
            connection_id: "user0001".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(request.connection_id(), "user0001");
        assert_eq!(request.password(), "secret");
        assert_eq!(Request::GetConnectionId.connection_id(), "");
        assert_eq!(Request::GetConnectionId.password(), "");
    }

    #[test]
    fn test_error_helpers() {
        assert_eq!(
            Response::unknown_connection_id(),
            Response::UnknownConnectionId {
                message: "The specified connection id is not known to the server".to_string()
            }
        );
        assert_eq!(
            Response::not_authorized(),
            Response::NotAuthorized {
                message: "Incorrect password".to_string()
            }
        );
    }
}
