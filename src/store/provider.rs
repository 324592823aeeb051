//! The room store trait shared by all backends
//!
//! Backends implement the required primitives; the matching and bulk helpers
//! are provided here so that every backend exposes identical semantics.

use crate::error::{MatchmakingError, Result};
use crate::store::transaction::RoomTransaction;
use crate::types::{Room, RoomId};
use std::collections::HashMap;
use tracing::debug;

/// Storage backend for rooms
///
/// All mutation of an existing room goes through [`RoomStore::begin_transaction`];
/// `create_room`, `delete_room` and `clear_rooms` are the only direct writes.
pub trait RoomStore: Send + Sync {
    /// Whether two transactions on the same room may proceed concurrently
    ///
    /// When false, callers must assume `begin_transaction` blocks until the
    /// prior transaction on the room is finalized.
    fn supports_concurrent_transactions_on_same_room(&self) -> bool;

    /// Create a new room with a freshly generated id
    ///
    /// Fails with [`MatchmakingError::BadRequest`] when `min_room_size`
    /// exceeds `max_room_size`.
    fn create_room(
        &self,
        host_connection_id: String,
        whitelist: Option<Vec<String>>,
        blacklist: Option<Vec<String>>,
        min_room_size: u32,
        max_room_size: u32,
    ) -> Result<Room>;

    /// Fetch a point-in-time copy of a room
    fn get_room(&self, room_id: &str) -> Result<Option<Room>>;

    /// Open a transaction on a room, or `None` if the room does not exist
    fn begin_transaction(&self, room_id: &str) -> Result<Option<RoomTransaction>>;

    /// Delete a room, returning its last state if it existed
    fn delete_room(&self, room_id: &str) -> Result<Option<Room>>;

    /// Delete every room
    fn clear_rooms(&self) -> Result<()>;

    fn contains_room(&self, room_id: &str) -> Result<bool>;

    /// All rooms in ascending id order
    fn all_rooms(&self) -> Result<Vec<Room>>;

    /// Register a callback invoked with the committed state after every
    /// transaction commit on this store
    fn register_commit_observer(&self, observer: Box<dyn Fn(&Room) + Send + Sync>);

    /// Delete several rooms, returning the ones that existed
    fn delete_rooms(&self, room_ids: &[RoomId]) -> Result<Vec<Room>> {
        let mut deleted = Vec::new();
        for room_id in room_ids {
            if let Some(room) = self.delete_room(room_id)? {
                deleted.push(room);
            }
        }
        Ok(deleted)
    }

    /// Fetch several rooms keyed by id; missing ids are absent from the map
    fn rooms_by_id(&self, room_ids: &[RoomId]) -> Result<HashMap<RoomId, Room>> {
        let mut rooms = HashMap::new();
        for room_id in room_ids {
            if let Some(room) = self.get_room(room_id)? {
                rooms.insert(room_id.clone(), room);
            }
        }
        Ok(rooms)
    }

    /// All rooms matching a predicate
    fn filter_rooms(&self, predicate: &dyn Fn(&Room) -> bool) -> Result<Vec<Room>> {
        Ok(self
            .all_rooms()?
            .into_iter()
            .filter(|room| predicate(room))
            .collect())
    }

    /// Run `f` inside a transaction on each existing room in `room_ids`
    ///
    /// Transactions left open by `f` are aborted before moving on.
    fn for_each_transaction(
        &self,
        room_ids: &[RoomId],
        f: &mut dyn FnMut(&mut RoomTransaction) -> Result<()>,
    ) -> Result<()> {
        for room_id in room_ids {
            if let Some(mut transaction) = self.begin_transaction(room_id)? {
                f(&mut transaction)?;
                transaction.abort()?;
            }
        }
        Ok(())
    }

    /// Find a room the given user may join, returning an open transaction on
    /// the first applicable one
    ///
    /// Candidates are pre-filtered on the game-started flag, then each is
    /// examined under its own transaction so the decision is made against
    /// current state. A candidate is rejected when:
    ///   - the game has started since the pre-filter,
    ///   - admitting the user would exceed `max_room_size`,
    ///   - the room's limits are narrower than the caller asked for,
    ///   - the caller's whitelist does not cover every connected user,
    ///   - the caller's blacklist hits any connected user,
    ///   - the room's whitelist does not contain the caller, or
    ///   - the room's blacklist contains the caller.
    fn find_applicable_room(
        &self,
        user_name: &str,
        whitelist: Option<&[String]>,
        blacklist: Option<&[String]>,
        min_room_size: u32,
        max_room_size: u32,
    ) -> Result<Option<RoomTransaction>> {
        let candidates = self.filter_rooms(&|room| !room.game_started)?;
        debug!(
            "Evaluating {} candidate room(s) for user {}",
            candidates.len(),
            user_name
        );

        for candidate in candidates {
            let Some(transaction) = self.begin_transaction(&candidate.id)? else {
                continue;
            };
            let room = transaction.room();

            if room.game_started() {
                transaction_abort(transaction)?;
                continue;
            }
            if room.connected_users().len() as u32 + 1 > room.max_room_size() {
                transaction_abort(transaction)?;
                continue;
            }
            if room.min_room_size() < min_room_size || room.max_room_size() > max_room_size {
                transaction_abort(transaction)?;
                continue;
            }
            if let Some(whitelist) = whitelist {
                let all_listed = room
                    .connected_users()
                    .iter()
                    .all(|user| whitelist.contains(&user.user_name));
                if !all_listed {
                    transaction_abort(transaction)?;
                    continue;
                }
            }
            if let Some(blacklist) = blacklist {
                let any_listed = room
                    .connected_users()
                    .iter()
                    .any(|user| blacklist.contains(&user.user_name));
                if any_listed {
                    transaction_abort(transaction)?;
                    continue;
                }
            }
            if let Some(room_whitelist) = room.whitelist() {
                if !room_whitelist.iter().any(|name| name == user_name) {
                    transaction_abort(transaction)?;
                    continue;
                }
            }
            if let Some(room_blacklist) = room.blacklist() {
                if room_blacklist.iter().any(|name| name == user_name) {
                    transaction_abort(transaction)?;
                    continue;
                }
            }

            debug!("Room {} is applicable for user {}", room.id(), user_name);
            return Ok(Some(transaction));
        }

        Ok(None)
    }
}

fn transaction_abort(mut transaction: RoomTransaction) -> Result<()> {
    transaction.abort()
}

/// Validate room size limits before creating a room
pub(crate) fn validate_room_sizes(min_room_size: u32, max_room_size: u32) -> Result<()> {
    if min_room_size > max_room_size {
        return Err(MatchmakingError::BadRequest {
            reason: format!(
                "min_room_size ({}) must not exceed max_room_size ({})",
                min_room_size, max_room_size
            ),
        }
        .into());
    }
    Ok(())
}
