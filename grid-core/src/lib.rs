use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub type PlayerId = String;

pub const DEFAULT_GRID_SIZE: usize = 10;
pub const MAX_GRID_SIZE: usize = 100;
/// Longest value (in chars) a single cell accepts.
pub const MAX_CELL_CHARS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub row: usize,
    pub col: usize,
}

impl Coord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Field name of this cell inside the grid hash.
    pub fn key(&self) -> String {
        format!("{},{}", self.row, self.col)
    }
}

/// Side length of the square grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize(usize);

impl GridSize {
    pub fn new(side: usize) -> Result<Self, GridError> {
        if side == 0 || side > MAX_GRID_SIZE {
            return Err(GridError::InvalidSize {
                side,
                max: MAX_GRID_SIZE,
            });
        }
        Ok(Self(side))
    }

    pub fn side(&self) -> usize {
        self.0
    }

    pub fn cell_count(&self) -> usize {
        self.0 * self.0
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.row < self.0 && coord.col < self.0
    }

    /// Every coordinate in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = Coord> {
        let side = self.0;
        (0..side).flat_map(move |row| (0..side).map(move |col| Coord::new(row, col)))
    }
}

impl Default for GridSize {
    fn default() -> Self {
        Self(DEFAULT_GRID_SIZE)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("grid size {side} must be between 1 and {max}")]
    InvalidSize { side: usize, max: usize },
}

/// One cell as clients see it. Ownership is not tracked, so `user_id` is
/// always `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellView {
    #[serde(rename = "char")]
    pub ch: String,
    #[serde(rename = "userId")]
    pub user_id: Option<PlayerId>,
}

/// A stored cell value counts as filled once it holds a non-blank character.
pub fn is_filled(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Field/value pairs for a freshly initialized grid.
pub fn empty_cells(size: GridSize) -> Vec<(String, String)> {
    size.coords().map(|c| (c.key(), String::new())).collect()
}

/// Orders raw grid hash fields into the row-major snapshot. Missing fields
/// read as empty.
pub fn snapshot_from_fields(size: GridSize, fields: &HashMap<String, String>) -> Vec<CellView> {
    size.coords()
        .map(|coord| CellView {
            ch: fields.get(&coord.key()).cloned().unwrap_or_default(),
            user_id: None,
        })
        .collect()
}

/// Inbound "place character" command exactly as decoded off the wire.
/// Every field is optional so missing fields surface as validation errors
/// rather than decode errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaceChar {
    pub row: Option<i64>,
    pub col: Option<i64>,
    #[serde(rename = "char")]
    pub ch: Option<String>,
}

/// A validated claim request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub coord: Coord,
    pub ch: String,
}

impl PlaceChar {
    pub fn validate(&self, size: GridSize) -> Result<Placement, CommandError> {
        let row = self.row.ok_or(CommandError::MissingField("row"))?;
        let col = self.col.ok_or(CommandError::MissingField("col"))?;
        let ch = self.ch.as_deref().ok_or(CommandError::MissingField("char"))?;

        if !is_filled(ch) {
            return Err(CommandError::BlankCharacter);
        }
        let len = ch.chars().count();
        if len > MAX_CELL_CHARS {
            return Err(CommandError::CharacterTooLong {
                len,
                max: MAX_CELL_CHARS,
            });
        }

        let out_of_bounds = CommandError::OutOfBounds {
            row,
            col,
            side: size.side(),
        };
        let (Ok(r), Ok(c)) = (usize::try_from(row), usize::try_from(col)) else {
            return Err(out_of_bounds);
        };
        let coord = Coord::new(r, c);
        if !size.contains(coord) {
            return Err(out_of_bounds);
        }

        Ok(Placement {
            coord,
            ch: ch.to_string(),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("character is blank")]
    BlankCharacter,
    #[error("character is {len} chars, max {max}")]
    CharacterTooLong { len: usize, max: usize },
    #[error("cell {row},{col} is outside the {side}x{side} grid")]
    OutOfBounds { row: i64, col: i64, side: usize },
}

/// Business-rule rejections of a claim. The display strings are sent to
/// clients verbatim.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejection {
    #[error("You have already submitted a character!")]
    AlreadySubmitted,
    #[error("Cell already taken!")]
    CellOccupied,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: usize) -> GridSize {
        GridSize::new(n).unwrap()
    }

    fn command(row: Option<i64>, col: Option<i64>, ch: Option<&str>) -> PlaceChar {
        PlaceChar {
            row,
            col,
            ch: ch.map(str::to_string),
        }
    }

    #[test]
    fn grid_size_rejects_zero_and_oversized() {
        assert_eq!(
            GridSize::new(0).unwrap_err(),
            GridError::InvalidSize { side: 0, max: MAX_GRID_SIZE }
        );
        assert!(GridSize::new(MAX_GRID_SIZE + 1).is_err());
        assert_eq!(GridSize::new(MAX_GRID_SIZE).unwrap().side(), MAX_GRID_SIZE);
        assert_eq!(GridSize::default().cell_count(), 100);
    }

    #[test]
    fn coords_are_row_major() {
        let coords: Vec<Coord> = size(2).coords().collect();
        assert_eq!(
            coords,
            vec![
                Coord::new(0, 0),
                Coord::new(0, 1),
                Coord::new(1, 0),
                Coord::new(1, 1)
            ]
        );
        assert_eq!(Coord::new(3, 4).key(), "3,4");
    }

    #[test]
    fn snapshot_fills_missing_fields_and_keeps_order() {
        let mut fields = HashMap::new();
        fields.insert("0,1".to_string(), "X".to_string());
        fields.insert("1,0".to_string(), String::new());

        let snapshot = snapshot_from_fields(size(2), &fields);
        let chars: Vec<&str> = snapshot.iter().map(|c| c.ch.as_str()).collect();
        assert_eq!(chars, vec!["", "X", "", ""]);
        assert!(snapshot.iter().all(|c| c.user_id.is_none()));
    }

    #[test]
    fn empty_cells_cover_whole_grid() {
        let cells = empty_cells(size(3));
        assert_eq!(cells.len(), 9);
        assert_eq!(cells[0], ("0,0".to_string(), String::new()));
        assert_eq!(cells[8].0, "2,2");
    }

    #[test]
    fn validate_accepts_in_bounds_character() {
        let placement = command(Some(3), Some(4), Some("X"))
            .validate(size(10))
            .unwrap();
        assert_eq!(placement.coord, Coord::new(3, 4));
        assert_eq!(placement.ch, "X");
    }

    #[test]
    fn validate_rejects_missing_and_blank_fields() {
        let grid = size(10);
        assert_eq!(
            command(None, Some(1), Some("X")).validate(grid).unwrap_err(),
            CommandError::MissingField("row")
        );
        assert_eq!(
            command(Some(1), None, Some("X")).validate(grid).unwrap_err(),
            CommandError::MissingField("col")
        );
        assert_eq!(
            command(Some(1), Some(1), None).validate(grid).unwrap_err(),
            CommandError::MissingField("char")
        );
        assert_eq!(
            command(Some(1), Some(1), Some("")).validate(grid).unwrap_err(),
            CommandError::BlankCharacter
        );
        assert_eq!(
            command(Some(1), Some(1), Some("  ")).validate(grid).unwrap_err(),
            CommandError::BlankCharacter
        );
    }

    #[test]
    fn validate_rejects_out_of_bounds_and_long_values() {
        let grid = size(10);
        for (row, col) in [(10, 0), (0, 10), (-1, 0), (0, -5)] {
            assert!(matches!(
                command(Some(row), Some(col), Some("X")).validate(grid),
                Err(CommandError::OutOfBounds { .. })
            ));
        }
        assert_eq!(
            command(Some(0), Some(0), Some("abcdefghi"))
                .validate(grid)
                .unwrap_err(),
            CommandError::CharacterTooLong { len: 9, max: MAX_CELL_CHARS }
        );
    }

    #[test]
    fn filled_means_non_blank() {
        assert!(is_filled("X"));
        assert!(!is_filled(""));
        assert!(!is_filled(" \t"));
    }

    #[test]
    fn wire_names_match_protocol() {
        let cell = CellView {
            ch: "X".into(),
            user_id: None,
        };
        assert_eq!(
            serde_json::to_value(&cell).unwrap(),
            serde_json::json!({ "char": "X", "userId": null })
        );

        let decoded: PlaceChar =
            serde_json::from_str(r#"{"row":3,"col":4,"char":"X"}"#).unwrap();
        assert_eq!(decoded, command(Some(3), Some(4), Some("X")));

        let partial: PlaceChar = serde_json::from_str(r#"{"char":"X"}"#).unwrap();
        assert_eq!(partial.row, None);
    }

    #[test]
    fn rejection_messages_are_user_facing() {
        assert_eq!(ClaimRejection::CellOccupied.to_string(), "Cell already taken!");
        assert_eq!(
            ClaimRejection::AlreadySubmitted.to_string(),
            "You have already submitted a character!"
        );
    }
}
