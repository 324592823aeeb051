//! Room storage backends
//!
//! Rooms live behind the [`RoomStore`] trait. All mutation goes through
//! change-tracked [`RoomTransaction`]s so that every backend gets the same
//! atomicity and commit-notification behavior regardless of how it persists
//! state.

pub mod memory;
pub mod provider;
pub mod sqlite;
pub mod transaction;

pub use memory::InMemoryRoomStore;
pub use provider::RoomStore;
pub use sqlite::SqliteRoomStore;
pub use transaction::{
    CommitObservers, RoomChange, RoomTransaction, TrackedRoom, TransactionBackend,
    TransactionState,
};
