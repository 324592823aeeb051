//! Connection id provider trait and the in-memory implementation
//!
//! The provider owns all issued identities. Identities are created on
//! issuance, looked up by id, and deleted on disconnect or expiry; they are
//! never mutated after creation.

use crate::error::Result;
use crate::types::ConnectionId;
use crate::utils::{generate_connection_id, generate_secret};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;

/// An issued connection id + secret pair used to authenticate requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub connection_id: ConnectionId,
    pub secret: String,
}

/// Outcome of an authorization query
///
/// This is deliberately three-way rather than boolean: the dispatcher maps
/// each case to a distinct error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// No identity with that connection id exists
    NotFound,
    /// The connection id exists but the secret does not match
    NotAuthorized,
    /// Exact secret match
    Authorized,
}

/// Trait for issuing and authorizing connection identities
pub trait ConnectionIdProvider: Send + Sync {
    /// Issue a fresh identity and remember it
    fn issue(&self) -> Result<Identity>;

    /// Look up an identity by connection id
    fn get(&self, connection_id: &str) -> Result<Option<Identity>>;

    /// Delete an identity, returning it if it existed
    fn delete(&self, connection_id: &str) -> Result<Option<Identity>>;

    /// Remove every issued identity (test/administrative clear-all)
    fn reset(&self) -> Result<()>;

    /// Check whether an identity with the given connection id exists
    fn contains(&self, connection_id: &str) -> Result<bool> {
        Ok(self.get(connection_id)?.is_some())
    }

    /// Authorize a candidate identity against the stored one
    fn is_authorized(&self, candidate: &Identity) -> Result<AuthorizationResult> {
        match self.get(&candidate.connection_id)? {
            None => Ok(AuthorizationResult::NotFound),
            Some(stored) if stored.secret == candidate.secret => {
                Ok(AuthorizationResult::Authorized)
            }
            Some(_) => Ok(AuthorizationResult::NotAuthorized),
        }
    }
}

/// Provider keeping issued identities in process memory
///
/// Identities vanish on restart and are not shared across nodes, so this is
/// only suitable for single-node deployments. The map is guarded by one
/// mutex; authorization is not a hot path relative to room transactions.
#[derive(Debug, Default)]
pub struct MemoryConnectionIdProvider {
    identities: Mutex<HashMap<ConnectionId, Identity>>,
}

impl MemoryConnectionIdProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities currently issued
    pub fn len(&self) -> usize {
        self.identities.lock().expect("identity map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConnectionIdProvider for MemoryConnectionIdProvider {
    fn issue(&self) -> Result<Identity> {
        let mut identities = self.identities.lock().expect("identity map poisoned");

        // Retry on the (unlikely) collision with an id already in use
        let connection_id = loop {
            let candidate = generate_connection_id();
            if !identities.contains_key(&candidate) {
                break candidate;
            }
        };

        let identity = Identity {
            connection_id: connection_id.clone(),
            secret: generate_secret(),
        };
        identities.insert(connection_id.clone(), identity.clone());

        trace!("Issued connection id {}", connection_id);
        Ok(identity)
    }

    fn get(&self, connection_id: &str) -> Result<Option<Identity>> {
        let identities = self.identities.lock().expect("identity map poisoned");
        Ok(identities.get(connection_id).cloned())
    }

    fn delete(&self, connection_id: &str) -> Result<Option<Identity>> {
        trace!("Deleting connection id {}", connection_id);
        let mut identities = self.identities.lock().expect("identity map poisoned");
        Ok(identities.remove(connection_id))
    }

    fn reset(&self) -> Result<()> {
        let mut identities = self.identities.lock().expect("identity map poisoned");
        identities.clear();
        Ok(())
    }
}
