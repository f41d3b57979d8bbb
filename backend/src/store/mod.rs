//! Shared State Store boundary.
//!
//! The coordination logic only ever talks to the store through [`StateStore`].
//! Each primitive is a single round trip and is atomic on its own; nothing
//! spans more than one call.

use std::collections::HashMap;

use async_trait::async_trait;

mod memory;
mod upstash;

pub use memory::MemoryStore;
pub use upstash::UpstashStore;

/// Key layout shared by every adapter.
pub mod keys {
    pub const GRID: &str = "grid:state";
    pub const ONLINE_PLAYERS: &str = "online:players";
    pub const HAS_SUBMITTED: &str = "has_submitted";

    const PLAYER_PREFIX: &str = "player:";

    pub fn player(player_id: &str) -> String {
        format!("{PLAYER_PREFIX}{player_id}")
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// All fields of a hash; empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally write every field.
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// Write each field only if it is not present yet.
    async fn hash_set_missing(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StoreError>;

    /// Write `value` only if the field is absent or blank. Returns whether the
    /// write happened.
    async fn hash_set_if_empty(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError>;

    /// In one atomic step: if the guard field already holds `guard_value`
    /// report [`GuardedWrite::GuardHeld`]; otherwise if the target field is
    /// filled report [`GuardedWrite::TargetFilled`]; otherwise write `value`
    /// to the target and `guard_value` to the guard.
    async fn hash_set_guarded(
        &self,
        guard_key: &str,
        guard_field: &str,
        guard_value: &str,
        target_key: &str,
        target_field: &str,
        value: &str,
    ) -> Result<GuardedWrite, StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn set_len(&self, key: &str) -> Result<u64, StoreError>;
}

/// Result of [`StateStore::hash_set_guarded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedWrite {
    Written,
    GuardHeld,
    TargetFilled,
}

/// Guard fields compare loosely: surrounding whitespace and ASCII case are
/// ignored.
pub fn guard_matches(current: &str, guard_value: &str) -> bool {
    current.trim().eq_ignore_ascii_case(guard_value.trim())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not set up store client: {0}")]
    Setup(String),

    #[error("store unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    #[error("unexpected store reply to {operation}: {message}")]
    Protocol {
        operation: &'static str,
        message: String,
    },

    #[error("key {key} holds the wrong kind of value")]
    WrongType { key: String },
}

impl StoreError {
    pub fn unavailable(operation: &'static str, message: impl ToString) -> Self {
        Self::Unavailable {
            operation,
            message: message.to_string(),
        }
    }

    pub fn protocol(operation: &'static str, message: impl ToString) -> Self {
        Self::Protocol {
            operation,
            message: message.to_string(),
        }
    }

    pub fn wrong_type(key: &str) -> Self {
        Self::WrongType {
            key: key.to_string(),
        }
    }
}
