//! Change-tracked room transactions
//!
//! A [`RoomTransaction`] holds a private working copy of one room plus the
//! ordered list of changes applied to it. Backends decide how a commit is
//! made durable; the transaction itself enforces the lifecycle (open until
//! committed or aborted, terminal operations are idempotent) and fires
//! commit observers after the backend has accepted the changes.

use crate::error::Result;
use crate::types::{ConnectionId, GameData, Room, User};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A single recorded mutation of a room
#[derive(Debug, Clone, PartialEq)]
pub enum RoomChange {
    GameStartedSet(bool),
    UserAdded(User),
    UserRemoved(ConnectionId),
    UsersCleared,
    GameStateReplaced(GameData),
    /// A payload appended to the host queue at the given index
    HostDataAppended { index: usize, data: GameData },
    /// The payload at the given index removed from the host queue
    HostDataRemoved { index: usize },
    HostDataCleared,
}

/// A room working copy that records every mutation applied to it
///
/// Reads always reflect the working copy, so a transaction observes its own
/// uncommitted changes. The change list preserves application order; backends
/// may replay it as minimal writes or ignore it and persist the snapshot.
#[derive(Debug, Clone)]
pub struct TrackedRoom {
    room: Room,
    changes: Vec<RoomChange>,
}

impl TrackedRoom {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            changes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.room.id
    }

    pub fn host_connection_id(&self) -> &str {
        &self.room.host_connection_id
    }

    pub fn whitelist(&self) -> Option<&Vec<String>> {
        self.room.whitelist.as_ref()
    }

    pub fn blacklist(&self) -> Option<&Vec<String>> {
        self.room.blacklist.as_ref()
    }

    pub fn min_room_size(&self) -> u32 {
        self.room.min_room_size
    }

    pub fn max_room_size(&self) -> u32 {
        self.room.max_room_size
    }

    pub fn connected_users(&self) -> &[User] {
        &self.room.connected_users
    }

    pub fn game_started(&self) -> bool {
        self.room.game_started
    }

    pub fn game_state(&self) -> &GameData {
        &self.room.game_state
    }

    pub fn data_to_be_sent_to_host(&self) -> &[GameData] {
        &self.room.data_to_be_sent_to_host
    }

    /// Changes recorded so far, in application order
    pub fn changes(&self) -> &[RoomChange] {
        &self.changes
    }

    /// A plain copy of the current working state
    pub fn snapshot(&self) -> Room {
        self.room.clone()
    }

    pub fn set_game_started(&mut self, started: bool) {
        self.room.game_started = started;
        self.changes.push(RoomChange::GameStartedSet(started));
    }

    /// Add a user unless one with the same connection id is already present
    ///
    /// Returns whether the user was added.
    pub fn add_user(&mut self, user: User) -> bool {
        let already_present = self
            .room
            .connected_users
            .iter()
            .any(|u| u.connection_id == user.connection_id);
        if already_present {
            return false;
        }
        self.room.connected_users.push(user.clone());
        self.changes.push(RoomChange::UserAdded(user));
        true
    }

    /// Remove the user with the given connection id, if present
    ///
    /// Returns whether a user was removed.
    pub fn remove_user(&mut self, connection_id: &str) -> bool {
        let before = self.room.connected_users.len();
        self.room
            .connected_users
            .retain(|u| u.connection_id != connection_id);
        if self.room.connected_users.len() == before {
            return false;
        }
        self.changes
            .push(RoomChange::UserRemoved(connection_id.to_string()));
        true
    }

    pub fn clear_users(&mut self) {
        self.room.connected_users.clear();
        self.changes.push(RoomChange::UsersCleared);
    }

    pub fn set_game_state(&mut self, game_state: GameData) {
        self.room.game_state = game_state.clone();
        self.changes.push(RoomChange::GameStateReplaced(game_state));
    }

    pub fn append_data_for_host(&mut self, data: GameData) {
        let index = self.room.data_to_be_sent_to_host.len();
        self.room.data_to_be_sent_to_host.push(data.clone());
        self.changes
            .push(RoomChange::HostDataAppended { index, data });
    }

    /// Remove the queued host payload at `index`, if in range
    pub fn remove_data_for_host(&mut self, index: usize) -> Option<GameData> {
        if index >= self.room.data_to_be_sent_to_host.len() {
            return None;
        }
        let removed = self.room.data_to_be_sent_to_host.remove(index);
        self.changes.push(RoomChange::HostDataRemoved { index });
        Some(removed)
    }

    pub fn clear_data_for_host(&mut self) {
        self.room.data_to_be_sent_to_host.clear();
        self.changes.push(RoomChange::HostDataCleared);
    }
}

/// Backend hooks a store supplies when it hands out a transaction
///
/// `commit` receives the final tracked state and must make it durable;
/// `abort` discards pending changes. `release` runs after the transaction
/// has marked itself finalized and is where a backend gives the room back
/// to other transactions, so waiters always observe the finalized flag set.
pub trait TransactionBackend: Send {
    fn commit(&mut self, room: &TrackedRoom) -> Result<()>;
    fn abort(&mut self) -> Result<()>;
    fn release(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Aborted,
}

/// Callbacks invoked with the committed room state after every commit
///
/// Observers are owned by the store and shared with each transaction it
/// hands out, so commits through any transaction notify the same set.
#[derive(Clone, Default)]
pub struct CommitObservers {
    observers: Arc<Mutex<Vec<Box<dyn Fn(&Room) + Send + Sync>>>>,
}

impl CommitObservers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, observer: F)
    where
        F: Fn(&Room) + Send + Sync + 'static,
    {
        let mut observers = self.observers.lock().expect("observer list poisoned");
        observers.push(Box::new(observer));
    }

    pub fn notify(&self, room: &Room) {
        let observers = self.observers.lock().expect("observer list poisoned");
        for observer in observers.iter() {
            observer(room);
        }
    }
}

impl std::fmt::Debug for CommitObservers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.observers.lock().map(|o| o.len()).unwrap_or(0);
        f.debug_struct("CommitObservers").field("count", &count).finish()
    }
}

/// A single-room transaction with exclusive or snapshot access per backend
pub struct RoomTransaction {
    room: TrackedRoom,
    backend: Box<dyn TransactionBackend>,
    observers: CommitObservers,
    state: TransactionState,
    finalized: Arc<AtomicBool>,
}

impl RoomTransaction {
    pub fn new(
        room: Room,
        backend: Box<dyn TransactionBackend>,
        observers: CommitObservers,
    ) -> Self {
        Self {
            room: TrackedRoom::new(room),
            backend,
            observers,
            state: TransactionState::Open,
            finalized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn room(&self) -> &TrackedRoom {
        &self.room
    }

    pub fn room_mut(&mut self) -> &mut TrackedRoom {
        &mut self.room
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Shared flag that flips to true once the transaction reaches a
    /// terminal state. Useful for threads observing a transaction they do
    /// not own.
    pub fn finalized_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finalized)
    }

    /// Make all recorded changes durable and notify commit observers
    ///
    /// Calling commit on an already-terminal transaction is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.state != TransactionState::Open {
            return Ok(());
        }
        debug!(
            "Committing transaction on room {} ({} changes)",
            self.room.id(),
            self.room.changes().len()
        );
        self.backend.commit(&self.room)?;
        self.state = TransactionState::Committed;
        self.finalized.store(true, Ordering::SeqCst);
        self.backend.release();

        let committed = self.room.snapshot();
        self.observers.notify(&committed);
        Ok(())
    }

    /// Discard all recorded changes
    ///
    /// Calling abort on an already-terminal transaction is a no-op.
    pub fn abort(&mut self) -> Result<()> {
        if self.state != TransactionState::Open {
            return Ok(());
        }
        debug!(
            "Aborting transaction on room {} ({} changes discarded)",
            self.room.id(),
            self.room.changes().len()
        );
        self.backend.abort()?;
        self.state = TransactionState::Aborted;
        self.finalized.store(true, Ordering::SeqCst);
        self.backend.release();
        Ok(())
    }
}

impl Drop for RoomTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            warn!(
                "Transaction on room {} dropped while open, aborting",
                self.room.id()
            );
            if let Err(error) = self.abort() {
                warn!("Abort on drop failed: {}", error);
            }
        }
    }
}

impl std::fmt::Debug for RoomTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomTransaction")
            .field("room_id", &self.room.id())
            .field("state", &self.state)
            .field("changes", &self.room.changes().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct RecordingBackend {
        commits: Arc<AtomicUsize>,
        aborts: Arc<AtomicUsize>,
    }

    impl TransactionBackend for RecordingBackend {
        fn commit(&mut self, _room: &TrackedRoom) -> Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&mut self) -> Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn create_test_room() -> Room {
        Room::new(
            "abcd1234".to_string(),
            "host0001".to_string(),
            None,
            None,
            1,
            4,
        )
    }

    fn create_test_transaction() -> (RoomTransaction, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let commits = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));
        let backend = RecordingBackend {
            commits: Arc::clone(&commits),
            aborts: Arc::clone(&aborts),
        };
        let transaction = RoomTransaction::new(
            create_test_room(),
            Box::new(backend),
            CommitObservers::new(),
        );
        (transaction, commits, aborts)
    }

    #[test]
    fn test_tracked_room_records_changes_in_order() {
        let mut tracked = TrackedRoom::new(create_test_room());
        let user = User::new("user0001".to_string(), "alice".to_string(), None, None);

        assert!(tracked.add_user(user.clone()));
        tracked.set_game_started(true);
        assert!(tracked.remove_user("user0001"));

        assert_eq!(
            tracked.changes(),
            &[
                RoomChange::UserAdded(user),
                RoomChange::GameStartedSet(true),
                RoomChange::UserRemoved("user0001".to_string()),
            ]
        );
    }

    #[test]
    fn test_add_user_is_unique_by_connection_id() {
        let mut tracked = TrackedRoom::new(create_test_room());
        let user = User::new("user0001".to_string(), "alice".to_string(), None, None);

        assert!(tracked.add_user(user.clone()));
        assert!(!tracked.add_user(user));
        assert_eq!(tracked.connected_users().len(), 1);
        assert_eq!(tracked.changes().len(), 1);
    }

    #[test]
    fn test_remove_missing_user_records_nothing() {
        let mut tracked = TrackedRoom::new(create_test_room());
        assert!(!tracked.remove_user("nobody"));
        assert!(tracked.changes().is_empty());
    }

    #[test]
    fn test_host_queue_indices() {
        let mut tracked = TrackedRoom::new(create_test_room());
        let mut first = GameData::new("user0001".to_string());
        first.insert("move".to_string(), serde_json::json!(1));
        let second = GameData::new("user0002".to_string());

        tracked.append_data_for_host(first.clone());
        tracked.append_data_for_host(second.clone());
        assert_eq!(
            tracked.changes()[0],
            RoomChange::HostDataAppended {
                index: 0,
                data: first.clone()
            }
        );

        let removed = tracked.remove_data_for_host(0).unwrap();
        assert_eq!(removed, first);
        assert_eq!(tracked.data_to_be_sent_to_host(), &[second]);
        assert!(tracked.remove_data_for_host(5).is_none());
    }

    #[test]
    fn test_commit_is_idempotent() {
        let (mut transaction, commits, aborts) = create_test_transaction();
        transaction.room_mut().set_game_started(true);

        transaction.commit().unwrap();
        transaction.commit().unwrap();
        transaction.abort().unwrap();

        assert_eq!(transaction.state(), TransactionState::Committed);
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(aborts.load(Ordering::SeqCst), 0);
        assert!(transaction.finalized_flag().load(Ordering::SeqCst));
    }

    #[test]
    fn test_abort_is_idempotent() {
        let (mut transaction, commits, aborts) = create_test_transaction();

        transaction.abort().unwrap();
        transaction.abort().unwrap();
        transaction.commit().unwrap();

        assert_eq!(transaction.state(), TransactionState::Aborted);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_aborts_open_transaction() {
        let (transaction, commits, aborts) = create_test_transaction();
        drop(transaction);
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_observers_fire_after_commit_with_final_state() {
        let observers = CommitObservers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        observers.register(move |room: &Room| {
            seen_clone
                .lock()
                .unwrap()
                .push((room.id.clone(), room.game_started));
        });

        let commits = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));
        let backend = RecordingBackend {
            commits: Arc::clone(&commits),
            aborts,
        };
        let mut transaction =
            RoomTransaction::new(create_test_room(), Box::new(backend), observers);
        transaction.room_mut().set_game_started(true);
        transaction.commit().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("abcd1234".to_string(), true)]);
    }

    #[test]
    fn test_observers_do_not_fire_on_abort() {
        let observers = CommitObservers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        observers.register(move |_room: &Room| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        let commits = Arc::new(AtomicUsize::new(0));
        let aborts = Arc::new(AtomicUsize::new(0));
        let backend = RecordingBackend {
            commits,
            aborts: Arc::clone(&aborts),
        };
        let mut transaction =
            RoomTransaction::new(create_test_room(), Box::new(backend), observers);
        transaction.abort().unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
