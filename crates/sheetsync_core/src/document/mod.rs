//! In-memory spreadsheet model.
//!
//! A [`Document`] is decoded fresh from the container bytes on every fetch and
//! lives only for one apply-and-commit attempt. It holds its sheets in source
//! order together with the [`Revision`] it was loaded at.
//!
//! # Key Types
//!
//! - [`DocumentId`] / [`Revision`] - opaque identifiers from the remote store
//! - [`Sheet`] - a named, sparse grid of cells
//! - [`Cell`] - the tagged cell value
//! - [`CellCoord`] - zero-based coordinates, written as A1 references

mod cell_ref;
/// Container codec (decode/encode)
pub mod codec;

pub use cell_ref::{CellCoord, CellRefError, MAX_COLS, MAX_ROWS};
pub use codec::{DecodeError, EncodeError};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier of a spreadsheet in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap a store identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Remote store version marker. Only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Wrap a store revision tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The raw tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The value held by a cell.
///
/// Formulas are carried as source text and never evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cell {
    /// No value
    Empty,
    /// Double-precision number
    Number(f64),
    /// Literal text (may be the empty string)
    Text(String),
    /// Boolean
    Boolean(bool),
    /// Formula source, without the leading `=`
    Formula(String),
}

impl Cell {
    /// Whether this is the empty value.
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Boolean(b)
    }
}

static EMPTY: Cell = Cell::Empty;

/// A named worksheet holding a sparse grid of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    cells: BTreeMap<CellCoord, Cell>,
}

impl Sheet {
    /// Create an empty sheet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    /// Sheet name (unique within its document).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value at `coord`; absent coordinates read as [`Cell::Empty`].
    pub fn cell(&self, coord: CellCoord) -> &Cell {
        self.cells.get(&coord).unwrap_or(&EMPTY)
    }

    /// Set a cell. Setting [`Cell::Empty`] removes the coordinate.
    pub fn set(&mut self, coord: CellCoord, value: Cell) {
        if value.is_empty() {
            self.cells.remove(&coord);
        } else {
            self.cells.insert(coord, value);
        }
    }

    /// Remove a cell, returning its previous value.
    pub fn clear(&mut self, coord: CellCoord) -> Option<Cell> {
        self.cells.remove(&coord)
    }

    /// Builder-style [`Sheet::set`].
    pub fn with_cell(mut self, coord: CellCoord, value: impl Into<Cell>) -> Self {
        self.set(coord, value.into());
        self
    }

    /// Non-empty cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (CellCoord, &Cell)> {
        self.cells.iter().map(|(coord, cell)| (*coord, cell))
    }

    /// Number of non-empty cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the sheet has no non-empty cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Attempt to add a sheet whose name is already taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sheet '{0}' already exists")]
pub struct DuplicateSheet(pub String);

/// Decoded spreadsheet plus the revision it was loaded at.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    revision: Revision,
    sheets: Vec<Sheet>,
}

impl Document {
    /// Create a document with no sheets.
    pub fn new(revision: Revision) -> Self {
        Self {
            revision,
            sheets: Vec::new(),
        }
    }

    /// Build a document from sheets in order, rejecting duplicate names.
    pub fn from_sheets(revision: Revision, sheets: Vec<Sheet>) -> Result<Self, DuplicateSheet> {
        let mut doc = Self::new(revision);
        for sheet in sheets {
            doc.push_sheet(sheet)?;
        }
        Ok(doc)
    }

    /// Revision this document was fetched at.
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    /// Sheets in source order.
    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    /// Look up a sheet by name.
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Mutable lookup by name.
    pub fn sheet_mut(&mut self, name: &str) -> Option<&mut Sheet> {
        self.sheets.iter_mut().find(|s| s.name == name)
    }

    /// Append a sheet at the end.
    pub fn push_sheet(&mut self, sheet: Sheet) -> Result<(), DuplicateSheet> {
        if self.sheet(&sheet.name).is_some() {
            return Err(DuplicateSheet(sheet.name));
        }
        self.sheets.push(sheet);
        Ok(())
    }
}
