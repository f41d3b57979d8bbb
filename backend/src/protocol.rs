//! Wire messages exchanged over each WebSocket connection.

use grid_core::{CellView, ClaimRejection, PlaceChar, PlayerId};
use serde::{Deserialize, Serialize};

/// Sent when a store failure aborts a command.
pub const GENERIC_FAILURE: &str = "Something went wrong, please try again.";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    PlaceChar(PlaceChar),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Init(InitPayload),
    PlayerCount(PlayerCount),
    CellUpdate(CellUpdate),
    SubmissionLocked,
    ErrorMsg(ErrorMsg),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InitPayload {
    pub player_id: PlayerId,
    pub grid: Vec<CellView>,
    pub online_count: u64,
    pub submitted: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerCount {
    pub online_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellUpdate {
    pub row: usize,
    pub col: usize,
    #[serde(rename = "char")]
    pub ch: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorMsg {
    pub message: String,
}

impl ServerMessage {
    pub fn player_count(online_count: u64) -> Self {
        Self::PlayerCount(PlayerCount { online_count })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::ErrorMsg(ErrorMsg {
            message: message.into(),
        })
    }

    pub fn rejected(rejection: ClaimRejection) -> Self {
        Self::error(rejection.to_string())
    }
}
