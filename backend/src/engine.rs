//! Grid Coordination Engine: the only code that reads or writes grid cells,
//! submission flags and the online set.

use std::sync::Arc;

use grid_core::{empty_cells, snapshot_from_fields, CellView, ClaimRejection, Coord, GridSize, Placement};

use crate::store::{guard_matches, keys, GuardedWrite, StateStore, StoreError};

const SUBMITTED: &str = "true";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] ClaimRejection),
    #[error("cell {0:?} is outside the grid")]
    OutOfBounds(Coord),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct GridEngine {
    store: Arc<dyn StateStore>,
    size: GridSize,
}

impl GridEngine {
    pub fn new(store: Arc<dyn StateStore>, size: GridSize) -> Self {
        Self { store, size }
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Row-major grid contents. The first call against an uninitialized store
    /// writes every cell as empty; existing cells are never touched.
    pub async fn snapshot(&self) -> Result<Vec<CellView>, StoreError> {
        let mut fields = self.store.hash_get_all(keys::GRID).await?;
        if fields.len() < self.size.cell_count() {
            self.store
                .hash_set_missing(keys::GRID, &empty_cells(self.size))
                .await?;
            tracing::info!(side = self.size.side(), "grid initialized");
            fields = self.store.hash_get_all(keys::GRID).await?;
        }
        Ok(snapshot_from_fields(self.size, &fields))
    }

    /// First writer wins. Fails with `CellOccupied` without writing when the
    /// cell already holds a character.
    pub async fn claim_cell(&self, placement: &Placement) -> Result<(), EngineError> {
        if !self.size.contains(placement.coord) {
            return Err(EngineError::OutOfBounds(placement.coord));
        }
        let claimed = self
            .store
            .hash_set_if_empty(keys::GRID, &placement.coord.key(), &placement.ch)
            .await?;
        if claimed {
            Ok(())
        } else {
            Err(ClaimRejection::CellOccupied.into())
        }
    }

    /// The player's one submission: checks the player's flag, claims the cell
    /// and records the flag as a single store step, so concurrent submissions
    /// from one player's tabs cannot both land.
    pub async fn submit(&self, player_id: &str, placement: &Placement) -> Result<(), EngineError> {
        if !self.size.contains(placement.coord) {
            return Err(EngineError::OutOfBounds(placement.coord));
        }
        let written = self
            .store
            .hash_set_guarded(
                &keys::player(player_id),
                keys::HAS_SUBMITTED,
                SUBMITTED,
                keys::GRID,
                &placement.coord.key(),
                &placement.ch,
            )
            .await?;
        match written {
            GuardedWrite::Written => Ok(()),
            GuardedWrite::GuardHeld => Err(ClaimRejection::AlreadySubmitted.into()),
            GuardedWrite::TargetFilled => Err(ClaimRejection::CellOccupied.into()),
        }
    }

    pub async fn mark_submitted(&self, player_id: &str) -> Result<(), StoreError> {
        self.store
            .hash_set(
                &keys::player(player_id),
                &[(keys::HAS_SUBMITTED.to_string(), SUBMITTED.to_string())],
            )
            .await
    }

    pub async fn has_submitted(&self, player_id: &str) -> Result<bool, StoreError> {
        let flag = self
            .store
            .hash_get(&keys::player(player_id), keys::HAS_SUBMITTED)
            .await?;
        Ok(flag.is_some_and(|v| guard_matches(&v, SUBMITTED)))
    }
}

/// Access to the shared online-player set.
#[derive(Clone)]
pub struct OnlinePlayers {
    store: Arc<dyn StateStore>,
}

impl OnlinePlayers {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn join(&self, player_id: &str) -> Result<(), StoreError> {
        self.store.set_add(keys::ONLINE_PLAYERS, player_id).await
    }

    pub async fn leave(&self, player_id: &str) -> Result<(), StoreError> {
        self.store.set_remove(keys::ONLINE_PLAYERS, player_id).await
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        self.store.set_len(keys::ONLINE_PLAYERS).await
    }
}
