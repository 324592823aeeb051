//! SQLite-backed room store
//!
//! Schema, four tables: `game_data` holds every serialized game-data blob,
//! `rooms` references its game-state blob, `users` and
//! `data_to_be_sent_to_host` reference their room. Foreign keys cascade so
//! that deleting a room's game-state row removes the room and everything
//! hanging off it.
//!
//! Each transaction runs on its own database connection: reads come from a
//! snapshot loaded at `begin_transaction`, and the commit replays the
//! recorded changes inside an immediate SQLite transaction. Two transactions
//! on the same room therefore do not block each other; the last commit wins
//! per field.

use crate::error::{MatchmakingError, Result};
use crate::store::provider::{validate_room_sizes, RoomStore};
use crate::store::transaction::{
    CommitObservers, RoomChange, RoomTransaction, TrackedRoom, TransactionBackend,
};
use crate::types::{GameData, Room, User};
use crate::utils::{current_timestamp, generate_room_id};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS game_data (
    id                  INTEGER PRIMARY KEY,
    created_at_utc      TEXT NOT NULL,
    created_by          TEXT NOT NULL,
    serialized_contents TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS rooms (
    id                 TEXT PRIMARY KEY,
    host_connection_id TEXT NOT NULL,
    whitelist          TEXT,
    blacklist          TEXT,
    min_room_size      INTEGER NOT NULL,
    max_room_size      INTEGER NOT NULL,
    game_state_id      INTEGER NOT NULL REFERENCES game_data (id) ON DELETE CASCADE,
    game_started       INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS users (
    connection_id TEXT NOT NULL,
    username      TEXT NOT NULL,
    ipv4          TEXT,
    ipv6          TEXT,
    connected_to  TEXT NOT NULL REFERENCES rooms (id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS data_to_be_sent_to_host (
    id              INTEGER PRIMARY KEY,
    belongs_to_room TEXT NOT NULL REFERENCES rooms (id) ON DELETE CASCADE,
    idx             INTEGER NOT NULL,
    game_data_id    INTEGER NOT NULL REFERENCES game_data (id) ON DELETE CASCADE
);
";

/// Room store persisting to a SQLite database file
pub struct SqliteRoomStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    observers: CommitObservers,
}

impl SqliteRoomStore {
    /// Open (and if necessary initialize) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("Using sqlite room store at {}", path.display());
        let conn = open_connection(&path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path,
            conn: Mutex::new(conn),
            observers: CommitObservers::new(),
        })
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Lowest free surrogate id in `game_data`
///
/// Ids are reused after deletion, so this scans upward from 1; fine for the
/// table sizes a matchmaking server sees.
fn next_game_data_id(conn: &Connection) -> Result<i64> {
    let mut id = 1i64;
    loop {
        let taken: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM game_data WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(id);
        }
        id += 1;
    }
}

fn insert_game_data(conn: &Connection, data: &GameData) -> Result<i64> {
    let id = next_game_data_id(conn)?;
    conn.execute(
        "INSERT INTO game_data (id, created_at_utc, created_by, serialized_contents)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            id,
            data.created_at_utc.to_rfc3339(),
            data.created_by_connection_id,
            serde_json::to_string(&data.contents)?,
        ],
    )?;
    Ok(id)
}

fn load_game_data(conn: &Connection, id: i64) -> Result<GameData> {
    let (created_at, created_by, serialized): (String, String, String) = conn.query_row(
        "SELECT created_at_utc, created_by, serialized_contents FROM game_data WHERE id = ?1",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(GameData {
        created_at_utc: parse_timestamp(&created_at)?,
        created_by_connection_id: created_by,
        contents: serde_json::from_str(&serialized)?,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|error| MatchmakingError::StoreFailure {
            message: format!("Invalid timestamp in database: {}", error),
        })?
        .with_timezone(&Utc))
}

fn join_names(names: &Option<Vec<String>>) -> Option<String> {
    names.as_ref().map(|list| list.join(","))
}

fn split_names(joined: Option<String>) -> Option<Vec<String>> {
    joined.map(|raw| {
        if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(',').map(str::to_string).collect()
        }
    })
}

fn load_room(conn: &Connection, room_id: &str) -> Result<Option<Room>> {
    type RoomRow = (String, Option<String>, Option<String>, u32, u32, i64, bool);
    let row: Option<RoomRow> = conn
        .query_row(
            "SELECT host_connection_id, whitelist, blacklist, min_room_size, max_room_size,
                    game_state_id, game_started
             FROM rooms WHERE id = ?1",
            params![room_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )
        .optional()?;
    let Some((host, whitelist, blacklist, min_size, max_size, game_state_id, started)) = row
    else {
        return Ok(None);
    };

    let mut user_stmt = conn.prepare(
        "SELECT connection_id, username, ipv4, ipv6 FROM users
         WHERE connected_to = ?1 ORDER BY rowid",
    )?;
    let user_rows = user_stmt.query_map(params![room_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;
    let mut connected_users = Vec::new();
    for user_row in user_rows {
        let (connection_id, user_name, ipv4, ipv6) = user_row?;
        connected_users.push(User {
            connection_id,
            user_name,
            ipv4: parse_addr::<Ipv4Addr>(ipv4)?,
            ipv6: parse_addr::<Ipv6Addr>(ipv6)?,
        });
    }

    let mut queue_stmt = conn.prepare(
        "SELECT game_data_id FROM data_to_be_sent_to_host
         WHERE belongs_to_room = ?1 ORDER BY idx",
    )?;
    let queue_ids: Vec<i64> = queue_stmt
        .query_map(params![room_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    let mut data_to_be_sent_to_host = Vec::with_capacity(queue_ids.len());
    for id in queue_ids {
        data_to_be_sent_to_host.push(load_game_data(conn, id)?);
    }

    Ok(Some(Room {
        id: room_id.to_string(),
        host_connection_id: host,
        whitelist: split_names(whitelist),
        blacklist: split_names(blacklist),
        min_room_size: min_size,
        max_room_size: max_size,
        connected_users,
        game_started: started,
        game_state: load_game_data(conn, game_state_id)?,
        data_to_be_sent_to_host,
    }))
}

fn parse_addr<T: std::str::FromStr>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(text) => text
            .parse::<T>()
            .map(Some)
            .map_err(|_| {
                MatchmakingError::StoreFailure {
                    message: format!("Invalid address in database: {}", text),
                }
                .into()
            }),
    }
}

fn insert_user(conn: &Connection, room_id: &str, user: &User) -> Result<()> {
    conn.execute(
        "INSERT INTO users (connection_id, username, ipv4, ipv6, connected_to)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user.connection_id,
            user.user_name,
            user.ipv4.map(|addr| addr.to_string()),
            user.ipv6.map(|addr| addr.to_string()),
            room_id,
        ],
    )?;
    Ok(())
}

/// Delete a room plus the game-data rows it owns
///
/// Removing the game-state row cascades to the room, which cascades to its
/// users and host-queue rows; queue payload rows are removed explicitly
/// first because nothing references them after the queue rows vanish.
fn delete_room_rows(conn: &Connection, room_id: &str) -> Result<()> {
    let mut queue_stmt = conn.prepare(
        "SELECT game_data_id FROM data_to_be_sent_to_host WHERE belongs_to_room = ?1",
    )?;
    let payload_ids: Vec<i64> = queue_stmt
        .query_map(params![room_id], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    drop(queue_stmt);
    for id in payload_ids {
        conn.execute("DELETE FROM game_data WHERE id = ?1", params![id])?;
    }
    conn.execute(
        "DELETE FROM game_data WHERE id IN (SELECT game_state_id FROM rooms WHERE id = ?1)",
        params![room_id],
    )?;
    Ok(())
}

struct SqliteBackend {
    room_id: String,
    conn: Option<Connection>,
}

impl TransactionBackend for SqliteBackend {
    fn commit(&mut self, room: &TrackedRoom) -> Result<()> {
        let mut conn = self
            .conn
            .take()
            .ok_or_else(|| MatchmakingError::StoreFailure {
                message: "Transaction connection already consumed".to_string(),
            })?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for change in room.changes() {
            apply_change(&tx, &self.room_id, change)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        // Nothing was written; dropping the connection is enough.
        self.conn = None;
        Ok(())
    }
}

fn apply_change(conn: &Connection, room_id: &str, change: &RoomChange) -> Result<()> {
    match change {
        RoomChange::GameStartedSet(started) => {
            conn.execute(
                "UPDATE rooms SET game_started = ?1 WHERE id = ?2",
                params![started, room_id],
            )?;
        }
        RoomChange::UserAdded(user) => {
            insert_user(conn, room_id, user)?;
        }
        RoomChange::UserRemoved(connection_id) => {
            conn.execute(
                "DELETE FROM users WHERE connection_id = ?1 AND connected_to = ?2",
                params![connection_id, room_id],
            )?;
        }
        RoomChange::UsersCleared => {
            conn.execute(
                "DELETE FROM users WHERE connected_to = ?1",
                params![room_id],
            )?;
        }
        RoomChange::GameStateReplaced(game_state) => {
            conn.execute(
                "UPDATE game_data
                 SET created_at_utc = ?1, created_by = ?2, serialized_contents = ?3
                 WHERE id = (SELECT game_state_id FROM rooms WHERE id = ?4)",
                params![
                    game_state.created_at_utc.to_rfc3339(),
                    game_state.created_by_connection_id,
                    serde_json::to_string(&game_state.contents)?,
                    room_id,
                ],
            )?;
        }
        RoomChange::HostDataAppended { index, data } => {
            let game_data_id = insert_game_data(conn, data)?;
            conn.execute(
                "INSERT INTO data_to_be_sent_to_host (belongs_to_room, idx, game_data_id)
                 VALUES (?1, ?2, ?3)",
                params![room_id, *index as i64, game_data_id],
            )?;
        }
        RoomChange::HostDataRemoved { index } => {
            let payload_id: Option<i64> = conn
                .query_row(
                    "SELECT game_data_id FROM data_to_be_sent_to_host
                     WHERE belongs_to_room = ?1 AND idx = ?2",
                    params![room_id, *index as i64],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(payload_id) = payload_id {
                conn.execute("DELETE FROM game_data WHERE id = ?1", params![payload_id])?;
            }
            conn.execute(
                "UPDATE data_to_be_sent_to_host SET idx = idx - 1
                 WHERE belongs_to_room = ?1 AND idx > ?2",
                params![room_id, *index as i64],
            )?;
        }
        RoomChange::HostDataCleared => {
            conn.execute(
                "DELETE FROM game_data WHERE id IN
                 (SELECT game_data_id FROM data_to_be_sent_to_host WHERE belongs_to_room = ?1)",
                params![room_id],
            )?;
        }
    }
    Ok(())
}

impl RoomStore for SqliteRoomStore {
    // Snapshot-per-transaction means transactions on the same room never
    // block each other; conflicting commits resolve last-writer-wins.
    fn supports_concurrent_transactions_on_same_room(&self) -> bool {
        true
    }

    fn create_room(
        &self,
        host_connection_id: String,
        whitelist: Option<Vec<String>>,
        blacklist: Option<Vec<String>>,
        min_room_size: u32,
        max_room_size: u32,
    ) -> Result<Room> {
        validate_room_sizes(min_room_size, max_room_size)?;

        let mut conn = self.conn.lock().expect("connection poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let room_id = loop {
            let candidate = generate_room_id();
            let taken: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM rooms WHERE id = ?1)",
                params![candidate],
                |row| row.get(0),
            )?;
            if !taken {
                break candidate;
            }
        };

        let game_state = GameData {
            created_at_utc: current_timestamp(),
            created_by_connection_id: host_connection_id.clone(),
            contents: serde_json::Map::new(),
        };
        let game_state_id = insert_game_data(&tx, &game_state)?;
        tx.execute(
            "INSERT INTO rooms (id, host_connection_id, whitelist, blacklist,
                                min_room_size, max_room_size, game_state_id, game_started)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![
                room_id,
                host_connection_id,
                join_names(&whitelist),
                join_names(&blacklist),
                min_room_size,
                max_room_size,
                game_state_id,
            ],
        )?;
        tx.commit()?;
        debug!("Created room {}", room_id);

        Ok(Room {
            id: room_id,
            host_connection_id,
            whitelist,
            blacklist,
            min_room_size,
            max_room_size,
            connected_users: Vec::new(),
            game_started: false,
            game_state,
            data_to_be_sent_to_host: Vec::new(),
        })
    }

    fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let conn = self.conn.lock().expect("connection poisoned");
        load_room(&conn, room_id)
    }

    fn begin_transaction(&self, room_id: &str) -> Result<Option<RoomTransaction>> {
        let conn = open_connection(&self.path)?;
        let Some(room) = load_room(&conn, room_id)? else {
            return Ok(None);
        };
        let backend = SqliteBackend {
            room_id: room_id.to_string(),
            conn: Some(conn),
        };
        Ok(Some(RoomTransaction::new(
            room,
            Box::new(backend),
            self.observers.clone(),
        )))
    }

    fn delete_room(&self, room_id: &str) -> Result<Option<Room>> {
        let mut conn = self.conn.lock().expect("connection poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(room) = load_room(&tx, room_id)? else {
            return Ok(None);
        };
        delete_room_rows(&tx, room_id)?;
        tx.commit()?;
        debug!("Deleted room {}", room_id);
        Ok(Some(room))
    }

    fn clear_rooms(&self) -> Result<()> {
        let conn = self.conn.lock().expect("connection poisoned");
        // Every room and queue entry hangs off a game_data row via cascades.
        conn.execute("DELETE FROM game_data", [])?;
        debug!("Cleared all rooms");
        Ok(())
    }

    fn contains_room(&self, room_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("connection poisoned");
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM rooms WHERE id = ?1)",
            params![room_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn all_rooms(&self) -> Result<Vec<Room>> {
        let ids: Vec<String> = {
            let conn = self.conn.lock().expect("connection poisoned");
            let mut stmt = conn.prepare("SELECT id FROM rooms ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            ids
        };
        let conn = self.conn.lock().expect("connection poisoned");
        let mut rooms = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(room) = load_room(&conn, &id)? {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    fn register_commit_observer(&self, observer: Box<dyn Fn(&Room) + Send + Sync>) {
        self.observers.register(observer);
    }
}
