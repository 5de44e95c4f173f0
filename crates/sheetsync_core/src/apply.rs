//! Cell mutations and the update applier.
//!
//! [`apply`] never touches the caller's [`Document`]; it works on a copy and
//! returns a new document carrying the original revision. A failed apply
//! therefore leaves nothing to undo.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::{Cell, CellCoord, Document};

/// One requested change to a single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target sheet name; must already exist.
    pub sheet: String,
    /// Target cell.
    #[serde(rename = "cell")]
    pub coord: CellCoord,
    /// New value, or `None` to clear the cell.
    #[serde(default)]
    pub value: Option<Cell>,
}

impl Mutation {
    /// Set `coord` on `sheet` to `value`.
    pub fn set(sheet: impl Into<String>, coord: CellCoord, value: impl Into<Cell>) -> Self {
        Self {
            sheet: sheet.into(),
            coord,
            value: Some(value.into()),
        }
    }

    /// Clear `coord` on `sheet`.
    pub fn delete(sheet: impl Into<String>, coord: CellCoord) -> Self {
        Self {
            sheet: sheet.into(),
            coord,
            value: None,
        }
    }
}

/// A malformed mutation batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error("mutation {index}: unknown sheet '{sheet}'")]
    UnknownSheet { index: usize, sheet: String },

    #[error("mutation {index}: cell {coord} on '{sheet}' is outside the worksheet grid")]
    InvalidCoordinate {
        index: usize,
        sheet: String,
        coord: CellCoord,
    },
}

/// Apply `mutations` in order to a copy of `doc`.
///
/// Later mutations to the same coordinate override earlier ones.
pub fn apply(doc: &Document, mutations: &[Mutation]) -> Result<Document, ApplyError> {
    let mut working = doc.clone();

    for (index, mutation) in mutations.iter().enumerate() {
        if !mutation.coord.in_bounds() {
            return Err(ApplyError::InvalidCoordinate {
                index,
                sheet: mutation.sheet.clone(),
                coord: mutation.coord,
            });
        }

        let sheet = working
            .sheet_mut(&mutation.sheet)
            .ok_or_else(|| ApplyError::UnknownSheet {
                index,
                sheet: mutation.sheet.clone(),
            })?;

        match &mutation.value {
            Some(value) => sheet.set(mutation.coord, value.clone()),
            None => {
                sheet.clear(mutation.coord);
            }
        }
    }

    Ok(working)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MAX_ROWS, Revision, Sheet};

    fn budget() -> Document {
        let jan = Sheet::new("Jan").with_cell(CellCoord::new(0, 0), 100.0);
        let feb = Sheet::new("Feb");
        Document::from_sheets(Revision::new("r1"), vec![jan, feb]).unwrap()
    }

    #[test]
    fn test_set_and_delete() {
        let doc = budget();
        let updated = apply(
            &doc,
            &[
                Mutation::set("Jan", CellCoord::new(0, 0), 150.0),
                Mutation::set("Feb", CellCoord::new(2, 1), "groceries"),
                Mutation::delete("Feb", CellCoord::new(7, 7)),
            ],
        )
        .unwrap();

        assert_eq!(updated.sheet("Jan").unwrap().cell(CellCoord::new(0, 0)), &Cell::Number(150.0));
        assert_eq!(
            updated.sheet("Feb").unwrap().cell(CellCoord::new(2, 1)),
            &Cell::Text("groceries".to_string())
        );
        assert_eq!(updated.revision(), &Revision::new("r1"));
        // The input is untouched.
        assert_eq!(doc.sheet("Jan").unwrap().cell(CellCoord::new(0, 0)), &Cell::Number(100.0));
    }

    #[test]
    fn test_later_mutation_wins() {
        let a = Cell::Number(1.0);
        let b = Cell::Text("two".to_string());
        let c = CellCoord::new(3, 3);

        for (first, second) in [(a.clone(), b.clone()), (b.clone(), a.clone())] {
            let updated = apply(
                &budget(),
                &[
                    Mutation::set("Jan", c, first.clone()),
                    Mutation::set("Jan", c, second.clone()),
                ],
            )
            .unwrap();
            assert_eq!(updated.sheet("Jan").unwrap().cell(c), &second);
        }

        let updated = apply(
            &budget(),
            &[Mutation::set("Jan", c, a.clone()), Mutation::delete("Jan", c)],
        )
        .unwrap();
        assert_eq!(updated.sheet("Jan").unwrap().cell(c), &Cell::Empty);

        let updated = apply(
            &budget(),
            &[Mutation::delete("Jan", c), Mutation::set("Jan", c, a.clone())],
        )
        .unwrap();
        assert_eq!(updated.sheet("Jan").unwrap().cell(c), &a);
    }

    #[test]
    fn test_unknown_sheet_is_not_created() {
        let doc = budget();
        let err = apply(
            &doc,
            &[
                Mutation::set("Jan", CellCoord::new(0, 0), 1.0),
                Mutation::set("NoSuchSheet", CellCoord::new(0, 0), 1.0),
            ],
        )
        .unwrap_err();

        assert_eq!(
            err,
            ApplyError::UnknownSheet {
                index: 1,
                sheet: "NoSuchSheet".to_string()
            }
        );
        assert!(doc.sheet("NoSuchSheet").is_none());
    }

    #[test]
    fn test_out_of_grid_coordinate() {
        let err = apply(
            &budget(),
            &[Mutation::set("Jan", CellCoord::new(MAX_ROWS, 0), 1.0)],
        )
        .unwrap_err();
        assert!(matches!(err, ApplyError::InvalidCoordinate { index: 0, .. }));
    }

    #[test]
    fn test_identical_batches_encode_identically() {
        let doc = budget();
        let batch = [
            Mutation::set("Feb", CellCoord::new(1, 1), Cell::Formula("Jan!A1*2".to_string())),
            Mutation::set("Jan", CellCoord::new(0, 1), true),
        ];
        let first = apply(&doc, &batch).unwrap().encode().unwrap();
        let second = apply(&doc, &batch).unwrap().encode().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mutation_json_shape() {
        let mutation: Mutation = serde_json::from_value(serde_json::json!({
            "sheet": "Jan",
            "cell": "A1",
            "value": {"type": "number", "value": 150}
        }))
        .unwrap();
        assert_eq!(mutation, Mutation::set("Jan", CellCoord::new(0, 0), 150.0));

        let mutation: Mutation =
            serde_json::from_value(serde_json::json!({"sheet": "Jan", "cell": "B2"})).unwrap();
        assert_eq!(mutation, Mutation::delete("Jan", CellCoord::new(1, 1)));
    }
}
