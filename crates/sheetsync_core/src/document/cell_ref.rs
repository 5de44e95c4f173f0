//! Cell coordinates and A1 references.
//!
//! Coordinates are zero-based internally (`row 0, col 0` is `A1`). The grid is
//! bounded by the container's limits so that every coordinate the decoder
//! accepts can be written back out.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of rows a worksheet can address.
pub const MAX_ROWS: u32 = 1_048_576;

/// Number of columns a worksheet can address (`A` through `XFD`).
pub const MAX_COLS: u32 = 16_384;

/// Zero-based `(row, column)` position of a cell.
///
/// Ordering is row-major, which is also the order cells are stored and
/// written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellCoord {
    /// Zero-based row index
    pub row: u32,
    /// Zero-based column index
    pub col: u32,
}

/// Error parsing an A1 reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellRefError {
    #[error("invalid cell reference '{0}'")]
    Malformed(String),

    #[error("cell reference '{0}' is outside the worksheet grid")]
    OutOfRange(String),
}

impl CellCoord {
    /// Create a coordinate from zero-based indices.
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Whether the coordinate lies inside the addressable grid.
    pub fn in_bounds(&self) -> bool {
        self.row < MAX_ROWS && self.col < MAX_COLS
    }

    /// Format the column index as letters (`0` → `A`, `26` → `AA`).
    pub fn column_name(col: u32) -> String {
        let mut n = col as u64 + 1;
        let mut letters = Vec::new();
        while n > 0 {
            let rem = ((n - 1) % 26) as u8;
            letters.push(b'A' + rem);
            n = (n - 1) / 26;
        }
        letters.reverse();
        String::from_utf8(letters).unwrap_or_default()
    }

    /// Render as an A1 reference, e.g. `D29`.
    pub fn to_a1(&self) -> String {
        format!("{}{}", Self::column_name(self.col), self.row as u64 + 1)
    }

    /// Parse an A1 reference. `$` absolute markers are accepted and ignored.
    pub fn parse_a1(input: &str) -> Result<Self, CellRefError> {
        let malformed = || CellRefError::Malformed(input.to_string());
        let s: String = input.trim().chars().filter(|c| *c != '$').collect();

        let split = s
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(malformed)?;
        let (letters, digits) = s.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(malformed());
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }

        // Column letters are bijective base-26; stop accumulating once past the grid.
        let mut col: u64 = 0;
        for c in letters.chars() {
            let v = (c.to_ascii_uppercase() as u8 - b'A') as u64 + 1;
            col = col * 26 + v;
            if col > MAX_COLS as u64 {
                return Err(CellRefError::OutOfRange(input.to_string()));
            }
        }

        let row: u64 = digits
            .parse()
            .map_err(|_| CellRefError::OutOfRange(input.to_string()))?;
        if row == 0 {
            return Err(malformed());
        }
        if row > MAX_ROWS as u64 {
            return Err(CellRefError::OutOfRange(input.to_string()));
        }

        Ok(Self::new((row - 1) as u32, (col - 1) as u32))
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

impl FromStr for CellCoord {
    type Err = CellRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_a1(s)
    }
}

impl TryFrom<String> for CellCoord {
    type Error = CellRefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_a1(&value)
    }
}

impl From<CellCoord> for String {
    fn from(coord: CellCoord) -> Self {
        coord.to_a1()
    }
}
