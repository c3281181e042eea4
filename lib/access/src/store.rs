//! Session and login-state storage contracts.
//!
//! The engines behind these traits own their records; handlers read them
//! fresh on every request and never cache them. Every engine must:
//! - return a record saved under an id to a later lookup of that id,
//! - treat expired records as absent,
//! - keep operations on different ids independent,
//! - hand out a login state at most once (`take_state` removes it).
//!
//! [`MemoryStore`] is the in-process engine. Persistent engines live with
//! the server.

use async_trait::async_trait;
use authservice_core::{Result, SessionId, StateId};
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::RwLock;

use crate::error::StoreError;
use crate::login_state::PendingLoginState;
use crate::session::Session;

/// Storage for authenticated sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Looks up a live session. `None` means the caller is not logged in.
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Stores a session, replacing any record with the same id.
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Removes a session. Removing an unknown id is not an error.
    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError>;
}

/// Storage for pending logins.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores a pending login under its id.
    async fn save_state(&self, state: &PendingLoginState) -> Result<(), StoreError>;

    /// Removes and returns a live pending login.
    ///
    /// Unknown, expired and already-taken ids all yield `None`.
    async fn take_state(
        &self,
        id: &StateId,
    ) -> Result<Option<PendingLoginState>, StoreError>;
}

/// Out-of-band removal of expired records.
#[async_trait]
pub trait ExpiryReaper: Send + Sync {
    /// Deletes expired sessions and login states, returning how many went.
    async fn reap_expired(&self) -> Result<u64, StoreError>;
}

fn poisoned(operation: &'static str) -> StoreError {
    StoreError::Backend {
        operation,
        details: "lock poisoned".to_string(),
    }
}

const SHARDS: usize = 16;

/// A map split across independently locked shards by key hash.
struct Sharded<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
}

impl<K, V> Default for Sharded<K, V> {
    fn default() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }
}

impl<K: Hash + Eq, V> Sharded<K, V> {
    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    fn retain(&self, keep: impl Fn(&V) -> bool) -> Result<usize, StoreError> {
        let mut removed = 0;
        for shard in &self.shards {
            let mut map = shard.write().map_err(|_| poisoned("reap"))?;
            let before = map.len();
            map.retain(|_, v| keep(v));
            removed += before - map.len();
        }
        Ok(removed)
    }
}

/// In-memory engine for both sessions and login states.
///
/// Records live until they are deleted or reaped; expired ones read as
/// absent in the meantime. Contents are lost on restart. Each map is
/// sharded, so requests for different ids rarely contend.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Sharded<SessionId, Session>,
    states: Sharded<StateId, PendingLoginState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let sessions = self
            .sessions
            .shard(id)
            .read()
            .map_err(|_| poisoned("get session"))?;
        Ok(sessions.get(id).filter(|s| !s.is_expired()).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .shard(session.id())
            .write()
            .map_err(|_| poisoned("save session"))?
            .insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions
            .shard(id)
            .write()
            .map_err(|_| poisoned("delete session"))?
            .remove(id);
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save_state(&self, state: &PendingLoginState) -> Result<(), StoreError> {
        self.states
            .shard(state.id())
            .write()
            .map_err(|_| poisoned("save state"))?
            .insert(state.id().clone(), state.clone());
        Ok(())
    }

    async fn take_state(
        &self,
        id: &StateId,
    ) -> Result<Option<PendingLoginState>, StoreError> {
        let taken = self
            .states
            .shard(id)
            .write()
            .map_err(|_| poisoned("take state"))?
            .remove(id);
        Ok(taken.filter(|s| !s.is_expired()))
    }
}

#[async_trait]
impl ExpiryReaper for MemoryStore {
    async fn reap_expired(&self) -> Result<u64, StoreError> {
        let removed = self.sessions.retain(|s| !s.is_expired())?
            + self.states.retain(|s| !s.is_expired())?;
        Ok(removed as u64)
    }
}
