//! Per-process bookkeeping of which connections currently represent each
//! player. Advisory only; the online set in the store is the shared truth.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use grid_core::PlayerId;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// Held while one player's connection count and online-set membership change
/// together.
pub type PresenceGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct ConnectionRegistry {
    players: RwLock<HashMap<PlayerId, HashSet<ConnectionId>>>,
    presence: Mutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the connection and returns how many connections the player now
    /// has. A result of 1 means this is the player's first connection.
    pub async fn register(&self, player_id: &str, connection_id: ConnectionId) -> usize {
        let mut players = self.players.write().await;
        let connections = players.entry(player_id.to_string()).or_default();
        connections.insert(connection_id);
        connections.len()
    }

    /// Removes the connection and returns how many remain. The player entry
    /// is dropped once it reaches zero.
    pub async fn unregister(&self, player_id: &str, connection_id: ConnectionId) -> usize {
        let mut players = self.players.write().await;
        let Some(connections) = players.get_mut(player_id) else {
            return 0;
        };
        connections.remove(&connection_id);
        let remaining = connections.len();
        if remaining == 0 {
            players.remove(player_id);
        }
        remaining
    }

    pub async fn connections(&self, player_id: &str) -> Vec<ConnectionId> {
        let players = self.players.read().await;
        players
            .get(player_id)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn count(&self, player_id: &str) -> usize {
        let players = self.players.read().await;
        players.get(player_id).map_or(0, HashSet::len)
    }

    /// Waits for exclusive presence handling of `player_id`. Other players are
    /// not blocked.
    pub async fn lock_presence(&self, player_id: &str) -> PresenceGuard {
        let lock = {
            let mut locks = self.presence.lock().await;
            locks.entry(player_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Releases the guard and forgets the player's lock once nobody else
    /// holds or waits on it.
    pub async fn release_presence(&self, player_id: &str, guard: PresenceGuard) {
        drop(guard);
        let mut locks = self.presence.lock().await;
        if locks
            .get(player_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(player_id);
        }
    }

    /// Distinct players with at least one connection on this instance.
    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }
}
