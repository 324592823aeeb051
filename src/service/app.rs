//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the connection id
//! provider, room store and request dispatcher together and runs background
//! tasks.

use crate::auth::{ConnectionIdProvider, MemoryConnectionIdProvider};
use crate::config::{AppConfig, StoreBackend};
use crate::dispatch::MessageDispatcher;
use crate::handlers::{
    DestroyRoomHandler, DisconnectHandler, GetConnectionIdHandler, GetRoomDataHandler,
    JoinOrCreateRoomHandler, SendDataToHostHandler, StartGameHandler, SubscribeToRoomHandler,
    UpdateGameStateHandler,
};
use crate::store::{InMemoryRoomStore, RoomStore, SqliteRoomStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Issues and authorizes connection identities
    connection_id_provider: Arc<dyn ConnectionIdProvider>,

    /// Holds all rooms
    room_store: Arc<dyn RoomStore>,

    /// Routes requests to handlers
    dispatcher: Arc<MessageDispatcher>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing green-room matchmaking service");
        info!(
            "Configuration: service={}, store_backend={:?}",
            config.service.name, config.store.backend
        );

        crate::config::validate_config(&config).map_err(|error| ServiceError::Configuration {
            message: error.to_string(),
        })?;

        let connection_id_provider: Arc<dyn ConnectionIdProvider> =
            Arc::new(MemoryConnectionIdProvider::new());

        let room_store: Arc<dyn RoomStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(InMemoryRoomStore::new()),
            StoreBackend::Sqlite => Arc::new(
                SqliteRoomStore::new(&config.store.sqlite_path).map_err(|error| {
                    ServiceError::Initialization {
                        message: format!("Failed to open sqlite store: {}", error),
                    }
                })?,
            ),
        };

        let dispatcher = Arc::new(MessageDispatcher::new(Arc::clone(&connection_id_provider)));
        Self::register_handlers(&dispatcher, &connection_id_provider, &room_store);

        Ok(Self {
            config,
            connection_id_provider,
            room_store,
            dispatcher,
            background_tasks: Vec::new(),
            is_running: Arc::new(RwLock::new(false)),
        })
    }

    /// Register all request handlers in their dispatch order
    fn register_handlers(
        dispatcher: &Arc<MessageDispatcher>,
        connection_id_provider: &Arc<dyn ConnectionIdProvider>,
        room_store: &Arc<dyn RoomStore>,
    ) {
        dispatcher.register_handler(Arc::new(GetConnectionIdHandler::new(Arc::clone(
            connection_id_provider,
        ))));
        dispatcher.register_handler(Arc::new(JoinOrCreateRoomHandler::new(Arc::clone(
            room_store,
        ))));
        dispatcher.register_handler(Arc::new(GetRoomDataHandler::new(Arc::clone(room_store))));
        dispatcher.register_handler(Arc::new(SendDataToHostHandler::new(Arc::clone(room_store))));
        dispatcher.register_handler(Arc::new(StartGameHandler::new(Arc::clone(room_store))));
        dispatcher.register_handler(Arc::new(UpdateGameStateHandler::new(Arc::clone(
            room_store,
        ))));
        dispatcher.register_handler(Arc::new(DestroyRoomHandler::new(Arc::clone(room_store))));
        dispatcher.register_handler(Arc::new(DisconnectHandler::new(
            Arc::clone(connection_id_provider),
            Arc::clone(room_store),
        )));
        dispatcher.register_handler(Arc::new(SubscribeToRoomHandler::new(Arc::clone(
            room_store,
        ))));
        info!("Registered request handlers");
    }

    /// Start background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                warn!("Service is already running");
                return Ok(());
            }
            *is_running = true;
        }

        let room_store = Arc::clone(&self.room_store);
        let interval = self.config.stats_interval();
        let stats_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match room_store.all_rooms() {
                    Ok(rooms) => {
                        let active_games = rooms.iter().filter(|room| room.game_started).count();
                        let connected_users: usize =
                            rooms.iter().map(|room| room.connected_users.len()).sum();
                        info!(
                            "Stats: {} room(s), {} active game(s), {} connected user(s)",
                            rooms.len(),
                            active_games,
                            connected_users
                        );
                    }
                    Err(error) => warn!("Stats collection failed: {}", error),
                }
            }
        });
        self.background_tasks.push(stats_task);

        info!("Service {} started", self.config.service.name);
        Ok(())
    }

    /// Stop background tasks
    pub async fn stop(&mut self) {
        {
            let mut is_running = self.is_running.write().await;
            if !*is_running {
                return;
            }
            *is_running = false;
        }

        for task in self.background_tasks.drain(..) {
            task.abort();
        }
        info!("Service {} stopped", self.config.service.name);
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn connection_id_provider(&self) -> &Arc<dyn ConnectionIdProvider> {
        &self.connection_id_provider
    }

    pub fn room_store(&self) -> &Arc<dyn RoomStore> {
        &self.room_store
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }
}
