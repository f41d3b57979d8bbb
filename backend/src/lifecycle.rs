//! Connection Lifecycle Controller.
//!
//! Drives each connection through `Connecting -> Active -> Closed` and turns
//! inbound commands into engine calls and outbound notifications.

use std::collections::HashSet;
use std::sync::Arc;

use grid_core::{ClaimRejection, GridSize, PlaceChar, PlayerId};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::engine::{EngineError, GridEngine, OnlinePlayers};
use crate::hub::{Hub, Inbox};
use crate::protocol::{CellUpdate, InitPayload, ServerMessage, GENERIC_FAILURE};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::{StateStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection has no player identity")]
    IdentityMissing,
    #[error("could not activate connection: {0}")]
    Store(#[from] StoreError),
}

/// A connection that reached the `Active` state.
#[derive(Debug, Clone)]
pub struct ActiveConnection {
    pub id: ConnectionId,
    pub player_id: PlayerId,
}

/// How a `place_char` command was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Malformed; nothing was sent back.
    Dropped,
    Claimed,
    AlreadySubmitted,
    CellOccupied,
    /// The store failed; the originator got the generic failure message.
    Failed,
}

pub struct Coordinator {
    engine: GridEngine,
    online: OnlinePlayers,
    registry: ConnectionRegistry,
    hub: Hub,
    /// Players with no connections left whose removal from the online set
    /// failed. Retried on every later connect and disconnect.
    owed_departures: Mutex<HashSet<PlayerId>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn StateStore>, grid_size: GridSize) -> Self {
        Self {
            engine: GridEngine::new(store.clone(), grid_size),
            online: OnlinePlayers::new(store),
            registry: ConnectionRegistry::new(),
            hub: Hub::new(),
            owed_departures: Mutex::new(HashSet::new()),
        }
    }

    pub fn engine(&self) -> &GridEngine {
        &self.engine
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Registers a new connection for `player_id` and sends it the initial
    /// state. On a store failure the connection is cleaned up again and the
    /// caller should close the transport.
    pub async fn connect(&self, player_id: &str) -> Result<(ActiveConnection, Inbox), SessionError> {
        let player_id = player_id.trim();
        if player_id.is_empty() {
            return Err(SessionError::IdentityMissing);
        }

        let connection = ActiveConnection {
            id: Uuid::new_v4(),
            player_id: player_id.to_string(),
        };
        // Attach first so this connection also sees its own join broadcast.
        let inbox = self.hub.attach(connection.id).await;

        if let Err(err) = self.activate(&connection).await {
            tracing::warn!(
                player_id = %connection.player_id,
                connection_id = %connection.id,
                error = %err,
                "failed to activate connection"
            );
            self.disconnect(&connection).await;
            return Err(err.into());
        }
        Ok((connection, inbox))
    }

    async fn activate(&self, connection: &ActiveConnection) -> Result<(), StoreError> {
        let player_id = connection.player_id.as_str();

        let guard = self.registry.lock_presence(player_id).await;
        let arrived = self.arrive(connection).await;
        self.registry.release_presence(player_id, guard).await;
        arrived?;

        self.settle_departures().await;

        let submitted = self.engine.has_submitted(player_id).await?;
        let grid = self.engine.snapshot().await?;
        let online_count = self.online.count().await?;

        self.hub
            .send_to(
                connection.id,
                ServerMessage::Init(InitPayload {
                    player_id: player_id.to_string(),
                    grid,
                    online_count,
                    submitted,
                }),
            )
            .await;
        if submitted {
            self.hub
                .send_to(connection.id, ServerMessage::SubmissionLocked)
                .await;
        }
        Ok(())
    }

    /// Registry and online-set half of activation. Caller holds the player's
    /// presence lock.
    async fn arrive(&self, connection: &ActiveConnection) -> Result<(), StoreError> {
        let player_id = connection.player_id.as_str();
        let connections = self.registry.register(player_id, connection.id).await;
        if connections > 1 {
            tracing::debug!(player_id, connections, "player opened another connection");
            return Ok(());
        }

        self.online.join(player_id).await?;
        self.owed_departures.lock().await.remove(player_id);
        let online_count = self.online.count().await?;
        self.hub
            .broadcast(ServerMessage::player_count(online_count))
            .await;
        tracing::info!(player_id, online_count, "player came online");
        Ok(())
    }

    /// Handles one `place_char` command. The caller must not run two of
    /// these concurrently for the same connection.
    pub async fn place_char(&self, connection: &ActiveConnection, command: PlaceChar) -> PlaceOutcome {
        let placement = match command.validate(self.engine.size()) {
            Ok(placement) => placement,
            Err(err) => {
                tracing::debug!(
                    player_id = %connection.player_id,
                    error = %err,
                    "dropping malformed place_char"
                );
                return PlaceOutcome::Dropped;
            }
        };

        let player_id = connection.player_id.as_str();
        match self.engine.submit(player_id, &placement).await {
            Ok(()) => {}
            Err(EngineError::Rejected(ClaimRejection::AlreadySubmitted)) => {
                self.reject(connection.id, ClaimRejection::AlreadySubmitted)
                    .await;
                self.hub
                    .send_to(connection.id, ServerMessage::SubmissionLocked)
                    .await;
                return PlaceOutcome::AlreadySubmitted;
            }
            Err(EngineError::Rejected(ClaimRejection::CellOccupied)) => {
                self.reject(connection.id, ClaimRejection::CellOccupied).await;
                return PlaceOutcome::CellOccupied;
            }
            Err(EngineError::OutOfBounds(coord)) => {
                tracing::debug!(player_id, ?coord, "dropping out of bounds claim");
                return PlaceOutcome::Dropped;
            }
            Err(EngineError::Store(err)) => return self.fail(connection, err).await,
        }

        self.hub
            .broadcast(ServerMessage::CellUpdate(CellUpdate {
                row: placement.coord.row,
                col: placement.coord.col,
                ch: placement.ch.clone(),
            }))
            .await;

        let tabs = self.registry.connections(player_id).await;
        self.hub
            .send_to_each(&tabs, ServerMessage::SubmissionLocked)
            .await;
        tracing::info!(
            player_id,
            cell = %placement.coord.key(),
            tabs = tabs.len(),
            "cell claimed"
        );
        PlaceOutcome::Claimed
    }

    /// Moves the connection to `Closed`. Only the player's last connection
    /// takes them out of the online set.
    pub async fn disconnect(&self, connection: &ActiveConnection) {
        self.hub.detach(connection.id).await;
        let player_id = connection.player_id.as_str();

        let guard = self.registry.lock_presence(player_id).await;
        let remaining = self.registry.unregister(player_id, connection.id).await;
        if remaining > 0 {
            tracing::debug!(player_id, remaining, "player closed a connection");
        } else {
            self.depart(player_id).await;
        }
        self.registry.release_presence(player_id, guard).await;

        self.settle_departures().await;
    }

    /// Takes a player with no connections left out of the online set and
    /// announces the new count. Caller holds the player's presence lock.
    async fn depart(&self, player_id: &str) {
        if let Err(err) = self.online.leave(player_id).await {
            tracing::warn!(player_id, error = %err, "failed to remove player from online set");
            self.owed_departures
                .lock()
                .await
                .insert(player_id.to_string());
            return;
        }
        self.owed_departures.lock().await.remove(player_id);

        match self.online.count().await {
            Ok(online_count) => {
                self.hub
                    .broadcast(ServerMessage::player_count(online_count))
                    .await;
                tracing::info!(player_id, online_count, "player went offline");
            }
            Err(err) => {
                tracing::warn!(player_id, error = %err, "failed to read online count");
            }
        }
    }

    /// Retries online-set removals that failed earlier.
    async fn settle_departures(&self) {
        let owed: Vec<PlayerId> = self.owed_departures.lock().await.iter().cloned().collect();
        for player_id in owed {
            let guard = self.registry.lock_presence(&player_id).await;
            let still_owed = self.owed_departures.lock().await.contains(&player_id);
            if still_owed && self.registry.count(&player_id).await == 0 {
                tracing::debug!(player_id = %player_id, "retrying online-set removal");
                self.depart(&player_id).await;
            }
            self.registry.release_presence(&player_id, guard).await;
        }
    }

    async fn reject(&self, connection_id: ConnectionId, rejection: ClaimRejection) {
        self.hub
            .send_to(connection_id, ServerMessage::rejected(rejection))
            .await;
    }

    async fn fail(&self, connection: &ActiveConnection, err: StoreError) -> PlaceOutcome {
        tracing::warn!(
            player_id = %connection.player_id,
            error = %err,
            "place_char aborted by store failure"
        );
        self.hub
            .send_to(connection.id, ServerMessage::error(GENERIC_FAILURE))
            .await;
        PlaceOutcome::Failed
    }
}
