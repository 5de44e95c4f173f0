//! Form submissions and the field → cell map.
//!
//! A form submission is a flat set of string fields. One field names the
//! target file; the [`FieldMap`] turns the others into text mutations on a
//! single sheet.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sheetsync_core::{Cell, CellCoord, Mutation};
use thiserror::Error;

/// Field holding the target document id.
pub const FILE_ID_FIELD: &str = "Current File ID";

/// Maps form fields to cells of one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    /// Sheet every mapped field is written to
    pub sheet: String,
    /// Field name → target cell (A1 notation in TOML)
    #[serde(default)]
    pub fields: BTreeMap<String, CellCoord>,
}

impl Default for FieldMap {
    fn default() -> Self {
        // Merged ranges D29:G29, D8:F8 and D6:G6 are addressed by their top-left cell.
        let fields = [("projectName", "D29"), ("projectNumber", "D8"), ("branch", "D6")]
            .into_iter()
            .filter_map(|(field, a1)| Some((field.to_string(), CellCoord::parse_a1(a1).ok()?)))
            .collect();
        Self {
            sheet: "Project Setup Form".to_string(),
            fields,
        }
    }
}

/// Failure loading a field map file.
#[derive(Debug, Error)]
pub enum FieldMapError {
    #[error("failed to read field map {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid field map {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl FieldMap {
    /// Load a map from TOML:
    ///
    /// ```toml
    /// sheet = "Project Setup Form"
    ///
    /// [fields]
    /// projectName = "D29"
    /// ```
    pub fn load(path: &Path) -> Result<Self, FieldMapError> {
        let text = std::fs::read_to_string(path).map_err(|source| FieldMapError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| FieldMapError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Text mutations for every mapped field with a non-empty value.
    pub fn mutations(&self, data: &FormData) -> Vec<Mutation> {
        self.fields
            .iter()
            .filter_map(|(field, coord)| {
                let value = data.get(field).filter(|v| !v.is_empty())?;
                Some(Mutation::set(
                    self.sheet.clone(),
                    *coord,
                    Cell::Text(value.to_string()),
                ))
            })
            .collect()
    }
}

/// Flat string fields of one submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: HashMap<String, String>,
}

impl FormData {
    /// Value of `field`, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// The non-empty target document id.
    pub fn file_id(&self) -> Option<&str> {
        self.get(FILE_ID_FIELD).map(str::trim).filter(|id| !id.is_empty())
    }

    /// Whether the submission carried no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Parse `a=1&b=2`. The first occurrence of a repeated key wins.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut fields = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(body) {
            fields.entry(key.into_owned()).or_insert_with(|| value.into_owned());
        }
        Self { fields }
    }

    /// Take the members of a JSON object. Scalars are stringified, nulls skipped.
    /// Anything other than an object yields no fields.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let fields = object
            .iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Some((key.clone(), text))
            })
            .collect();
        Self { fields }
    }

    /// Parse a JSON body; malformed JSON yields no fields.
    pub fn from_json_bytes(body: &[u8]) -> Self {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => Self::from_json(&value),
            Err(e) => {
                tracing::warn!("Failed to parse body as JSON: {}", e);
                Self::default()
            }
        }
    }

    /// Parse a webhook body of unknown shape.
    ///
    /// Tried in order: a form-encoded body, a body that looks form-encoded
    /// despite its content type, then JSON.
    pub fn from_webhook(content_type: Option<&str>, body: &[u8]) -> Self {
        let is_form = content_type.is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        });
        if is_form {
            let data = Self::from_urlencoded(body);
            if !data.is_empty() {
                return data;
            }
        }

        let text = String::from_utf8_lossy(body);
        if text.contains('=') && text.contains('&') {
            return Self::from_urlencoded(body);
        }
        if text.trim().is_empty() {
            return Self::default();
        }
        Self::from_json_bytes(body)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
