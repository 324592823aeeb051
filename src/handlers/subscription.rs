//! Room subscriptions
//!
//! A subscribed session receives the committed room state as a
//! `GetRoomData` push after every transaction commit on that room.

use crate::dispatch::session::{Session, SourceAddress};
use crate::error::{MatchmakingError, Result};
use crate::handlers::RequestHandler;
use crate::messages::{Request, Response};
use crate::store::RoomStore;
use crate::types::RoomId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

type Subscriptions = Arc<Mutex<HashMap<RoomId, Vec<Arc<dyn Session>>>>>;

/// Registers sessions for commit notifications on a room
pub struct SubscribeToRoomHandler {
    room_store: Arc<dyn RoomStore>,
    subscriptions: Subscriptions,
}

impl SubscribeToRoomHandler {
    /// Create the handler and hook it into the store's commit pipeline
    pub fn new(room_store: Arc<dyn RoomStore>) -> Self {
        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));

        let observer_subscriptions = Arc::clone(&subscriptions);
        room_store.register_commit_observer(Box::new(move |room| {
            let mut subscriptions = observer_subscriptions
                .lock()
                .expect("subscription map poisoned");
            let Some(sessions) = subscriptions.get_mut(&room.id) else {
                return;
            };
            let update = Response::GetRoomData {
                room: Some(room.clone()),
            };
            // Sessions that fail to accept the push are dropped.
            sessions.retain(|session| match session.send(&update) {
                Ok(()) => true,
                Err(error) => {
                    warn!(
                        "Dropping subscriber {} of room {}: {}",
                        session.id(),
                        room.id,
                        error
                    );
                    false
                }
            });
        }));

        Self {
            room_store,
            subscriptions,
        }
    }

    /// Number of sessions currently subscribed to a room
    pub fn subscriber_count(&self, room_id: &str) -> usize {
        let subscriptions = self.subscriptions.lock().expect("subscription map poisoned");
        subscriptions.get(room_id).map_or(0, Vec::len)
    }
}

impl RequestHandler for SubscribeToRoomHandler {
    fn name(&self) -> &'static str {
        "SubscribeToRoomHandler"
    }

    fn can_handle(&self, request: &Request) -> bool {
        matches!(request, Request::SubscribeToRoom(_))
    }

    fn needs_authentication(&self, _request: &Request) -> bool {
        true
    }

    fn wants_session_notifications(&self) -> bool {
        true
    }

    fn handle(
        &self,
        request: &Request,
        _source: &SourceAddress,
        session: Option<&Arc<dyn Session>>,
    ) -> Result<Response> {
        let Request::SubscribeToRoom(request) = request else {
            unreachable!("dispatcher routed a foreign request");
        };
        let Some(session) = session else {
            return Err(MatchmakingError::BadRequest {
                reason: "Subscriptions require a bidirectional session".to_string(),
            }
            .into());
        };
        if !self.room_store.contains_room(&request.room_id)? {
            return Err(MatchmakingError::BadRequest {
                reason: format!("No room with id {}", request.room_id),
            }
            .into());
        }

        let mut subscriptions = self.subscriptions.lock().expect("subscription map poisoned");
        let sessions = subscriptions.entry(request.room_id.clone()).or_default();
        if !sessions.iter().any(|s| s.id() == session.id()) {
            sessions.push(Arc::clone(session));
            debug!("Session {} subscribed to room {}", session.id(), request.room_id);
        }

        Ok(Response::SubscribeToRoom {
            room_id: request.room_id.clone(),
        })
    }

    fn on_session_closed(&self, session: &Arc<dyn Session>) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription map poisoned");
        for sessions in subscriptions.values_mut() {
            sessions.retain(|s| s.id() != session.id());
        }
        subscriptions.retain(|_, sessions| !sessions.is_empty());
        debug!("Session {} unsubscribed from all rooms", session.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SubscribeToRoomRequest;
    use crate::store::InMemoryRoomStore;
    use uuid::Uuid;

    struct RecordingSession {
        id: Uuid,
        received: Mutex<Vec<Response>>,
    }

    impl RecordingSession {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl Session for RecordingSession {
        fn id(&self) -> Uuid {
            self.id
        }

        fn send(&self, response: &Response) -> Result<()> {
            self.received.lock().unwrap().push(response.clone());
            Ok(())
        }
    }

    fn subscribe_request(room_id: &str) -> Request {
        Request::SubscribeToRoom(SubscribeToRoomRequest {
            connection_id: "user0001".to_string(),
            password: "secret".to_string(),
            room_id: room_id.to_string(),
        })
    }

    #[test]
    fn test_subscriber_receives_commit_push() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = SubscribeToRoomHandler::new(store.clone());
        let room = store
            .create_room("host0001".to_string(), None, None, 1, 4)
            .unwrap();

        let session = RecordingSession::new();
        let session_dyn: Arc<dyn Session> = session.clone();
        handler
            .handle(
                &subscribe_request(&room.id),
                &SourceAddress::unknown(),
                Some(&session_dyn),
            )
            .unwrap();

        let mut transaction = store.begin_transaction(&room.id).unwrap().unwrap();
        transaction.room_mut().set_game_started(true);
        transaction.commit().unwrap();

        let received = session.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let Response::GetRoomData { room: Some(pushed) } = &received[0] else {
            panic!("expected a room push, got {:?}", received[0]);
        };
        assert!(pushed.game_started);
    }

    #[test]
    fn test_aborted_transaction_pushes_nothing() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = SubscribeToRoomHandler::new(store.clone());
        let room = store
            .create_room("host0001".to_string(), None, None, 1, 4)
            .unwrap();

        let session = RecordingSession::new();
        let session_dyn: Arc<dyn Session> = session.clone();
        handler
            .handle(
                &subscribe_request(&room.id),
                &SourceAddress::unknown(),
                Some(&session_dyn),
            )
            .unwrap();

        let mut transaction = store.begin_transaction(&room.id).unwrap().unwrap();
        transaction.room_mut().set_game_started(true);
        transaction.abort().unwrap();

        assert!(session.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_session_close_removes_subscriptions() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = SubscribeToRoomHandler::new(store.clone());
        let room = store
            .create_room("host0001".to_string(), None, None, 1, 4)
            .unwrap();

        let session = RecordingSession::new();
        let session_dyn: Arc<dyn Session> = session.clone();
        handler
            .handle(
                &subscribe_request(&room.id),
                &SourceAddress::unknown(),
                Some(&session_dyn),
            )
            .unwrap();
        assert_eq!(handler.subscriber_count(&room.id), 1);

        handler.on_session_closed(&session_dyn);
        assert_eq!(handler.subscriber_count(&room.id), 0);
    }

    #[test]
    fn test_subscribe_without_session_fails() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = SubscribeToRoomHandler::new(store.clone());
        let room = store
            .create_room("host0001".to_string(), None, None, 1, 4)
            .unwrap();

        let result = handler.handle(&subscribe_request(&room.id), &SourceAddress::unknown(), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_subscribe_to_missing_room_fails() {
        let store: Arc<dyn RoomStore> = Arc::new(InMemoryRoomStore::new());
        let handler = SubscribeToRoomHandler::new(store);

        let session = RecordingSession::new();
        let session_dyn: Arc<dyn Session> = session;
        let result = handler.handle(
            &subscribe_request("missing1"),
            &SourceAddress::unknown(),
            Some(&session_dyn),
        );
        assert!(result.is_err());
    }
}
