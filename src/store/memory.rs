//! In-memory room store
//!
//! State lives in a `BTreeMap` so listings come back in a stable order.
//! Transactions on the same room are serialized with a per-room lock:
//! `begin_transaction` blocks until the previous transaction on that room is
//! committed or aborted.

use crate::error::Result;
use crate::store::provider::{validate_room_sizes, RoomStore};
use crate::store::transaction::{
    CommitObservers, RoomTransaction, TrackedRoom, TransactionBackend,
};
use crate::types::{Room, RoomId};
use crate::utils::generate_room_id;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, info};

/// Per-room transaction gate
#[derive(Debug, Default)]
struct RoomLock {
    busy: Mutex<bool>,
    released: Condvar,
}

impl RoomLock {
    /// Block until the room is free, then mark it busy
    fn acquire(&self) {
        let mut busy = self.busy.lock().expect("room lock poisoned");
        while *busy {
            busy = self.released.wait(busy).expect("room lock poisoned");
        }
        *busy = true;
    }

    fn release(&self) {
        let mut busy = self.busy.lock().expect("room lock poisoned");
        *busy = false;
        self.released.notify_one();
    }
}

/// State shared between the store and the backends it hands out
#[derive(Debug, Default)]
struct SharedRooms {
    rooms: Mutex<BTreeMap<RoomId, Room>>,
}

/// Room store backed by process memory
///
/// Contents are lost on restart. Suitable for single-node deployments and
/// tests.
#[derive(Debug, Default)]
pub struct InMemoryRoomStore {
    shared: Arc<SharedRooms>,
    locks: Mutex<HashMap<RoomId, Arc<RoomLock>>>,
    observers: CommitObservers,
}

impl InMemoryRoomStore {
    pub fn new() -> Self {
        info!("Using in-memory room store");
        Self::default()
    }

    fn lock_for(&self, room_id: &str) -> Arc<RoomLock> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        Arc::clone(
            locks
                .entry(room_id.to_string())
                .or_insert_with(|| Arc::new(RoomLock::default())),
        )
    }
}

struct MemoryBackend {
    room_id: RoomId,
    shared: Arc<SharedRooms>,
    lock: Arc<RoomLock>,
}

impl TransactionBackend for MemoryBackend {
    fn commit(&mut self, room: &TrackedRoom) -> Result<()> {
        let snapshot = room.snapshot();
        let mut rooms = self.shared.rooms.lock().expect("room map poisoned");
        rooms.insert(self.room_id.clone(), snapshot);
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        Ok(())
    }

    // The room lock is held for the whole transaction; waiters wake here,
    // after the transaction is marked finalized.
    fn release(&mut self) {
        self.lock.release();
    }
}

impl RoomStore for InMemoryRoomStore {
    fn supports_concurrent_transactions_on_same_room(&self) -> bool {
        false
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

        let mut rooms = self.shared.rooms.lock().expect("room map poisoned");
        let room_id = loop {
            let candidate = generate_room_id();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let room = Room::new(
            room_id.clone(),
            host_connection_id,
            whitelist,
            blacklist,
            min_room_size,
            max_room_size,
        );
        rooms.insert(room_id.clone(), room.clone());
        debug!("Created room {}", room_id);
        Ok(room)
    }

    fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let rooms = self.shared.rooms.lock().expect("room map poisoned");
        Ok(rooms.get(room_id).cloned())
    }

    fn begin_transaction(&self, room_id: &str) -> Result<Option<RoomTransaction>> {
        if !self.contains_room(room_id)? {
            return Ok(None);
        }

        let lock = self.lock_for(room_id);
        lock.acquire();

        // The room may have been deleted while we waited for the lock.
        let room = {
            let rooms = self.shared.rooms.lock().expect("room map poisoned");
            rooms.get(room_id).cloned()
        };
        let Some(room) = room else {
            lock.release();
            return Ok(None);
        };

        let backend = MemoryBackend {
            room_id: room_id.to_string(),
            shared: Arc::clone(&self.shared),
            lock,
        };
        Ok(Some(RoomTransaction::new(
            room,
            Box::new(backend),
            self.observers.clone(),
        )))
    }

    fn delete_room(&self, room_id: &str) -> Result<Option<Room>> {
        let mut rooms = self.shared.rooms.lock().expect("room map poisoned");
        let removed = rooms.remove(room_id);
        if removed.is_some() {
            debug!("Deleted room {}", room_id);
        }
        Ok(removed)
    }

    fn clear_rooms(&self) -> Result<()> {
        let mut rooms = self.shared.rooms.lock().expect("room map poisoned");
        let count = rooms.len();
        rooms.clear();
        debug!("Cleared {} room(s)", count);
        Ok(())
    }

    fn contains_room(&self, room_id: &str) -> Result<bool> {
        let rooms = self.shared.rooms.lock().expect("room map poisoned");
        Ok(rooms.contains_key(room_id))
    }

    fn all_rooms(&self) -> Result<Vec<Room>> {
        let rooms = self.shared.rooms.lock().expect("room map poisoned");
        Ok(rooms.values().cloned().collect())
    }

    fn register_commit_observer(&self, observer: Box<dyn Fn(&Room) + Send + Sync>) {
        self.observers.register(observer);
    }
}
