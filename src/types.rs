//! Common types used throughout the matchmaking server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Unique identifier for client connections
pub type ConnectionId = String;

/// Unique identifier for rooms
pub type RoomId = String;

/// A user connected to a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub connection_id: ConnectionId,
    pub user_name: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl User {
    pub fn new(
        connection_id: impl Into<ConnectionId>,
        user_name: impl Into<String>,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            user_name: user_name.into(),
            ipv4,
            ipv6,
        }
    }
}

/// A timestamped, attributable key-value payload attached to a room, either
/// as its current shared state or queued for delivery to the host.
///
/// `contents` preserves insertion order so that payloads replay to the host
/// in the order the sender assembled them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameData {
    pub created_at_utc: DateTime<Utc>,
    pub created_by_connection_id: ConnectionId,
    pub contents: Map<String, Value>,
}

impl GameData {
    /// Create an empty payload attributed to the given connection
    pub fn new(created_by_connection_id: impl Into<ConnectionId>) -> Self {
        Self {
            created_at_utc: crate::utils::current_timestamp(),
            created_by_connection_id: created_by_connection_id.into(),
            contents: Map::new(),
        }
    }

    /// Insert or replace a single entry
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.contents.insert(key.into(), value);
    }

    /// Look up a single entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.contents.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// The central aggregate: a matchmaking session-to-be, holding membership,
/// size bounds, and shared game payloads.
///
/// A `Room` obtained from a store query is a read-only snapshot; all
/// persistent mutation happens through a room transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub host_connection_id: ConnectionId,
    /// If set, only these user names may join
    pub whitelist: Option<Vec<String>>,
    /// If set, these user names may not join
    pub blacklist: Option<Vec<String>>,
    pub min_room_size: u32,
    pub max_room_size: u32,
    /// Ordered, unique by connection id
    pub connected_users: Vec<User>,
    pub game_started: bool,
    /// Always present; a room is created with an empty game state
    pub game_state: GameData,
    /// Payloads awaiting delivery to the host, in arrival order
    pub data_to_be_sent_to_host: Vec<GameData>,
}

impl Room {
    /// Create a freshly hydrated room with an empty game state
    pub fn new(
        id: impl Into<RoomId>,
        host_connection_id: impl Into<ConnectionId>,
        whitelist: Option<Vec<String>>,
        blacklist: Option<Vec<String>>,
        min_room_size: u32,
        max_room_size: u32,
    ) -> Self {
        let host_connection_id = host_connection_id.into();
        let game_state = GameData::new(host_connection_id.clone());
        Self {
            id: id.into(),
            host_connection_id,
            whitelist,
            blacklist,
            min_room_size,
            max_room_size,
            connected_users: Vec::new(),
            game_started: false,
            game_state,
            data_to_be_sent_to_host: Vec::new(),
        }
    }
}
