//! SpreadsheetML container codec.
//!
//! Decodes the zip-of-XML package into a [`Document`] and encodes it back.
//! Only the parts that carry sheet structure and cell values are read:
//!
//! ```text
//! _rels/.rels                  -> locates the workbook part
//! xl/workbook.xml              -> sheet names, in order
//! xl/_rels/workbook.xml.rels   -> sheet relationship id -> worksheet part
//! xl/sharedStrings.xml         -> shared string table (optional)
//! xl/worksheets/sheetN.xml     -> <sheetData> cells
//! ```
//!
//! Encoding always writes inline strings and fixed zip timestamps, so the same
//! document encodes to the same bytes.

use std::io::{Cursor, Read, Seek, Write};

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;

use super::{CellCoord, Document, MAX_ROWS, Revision, Sheet};
use crate::document::Cell;

/// Largest single part inflated into memory.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;

/// Longest sheet name the container accepts.
const MAX_SHEET_NAME_CHARS: usize = 31;

const SPREADSHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const OFFICE_DOCUMENT_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
const WORKSHEET_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";

/// Failure to decode container bytes. No partial document is ever returned.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a readable zip container: {0}")]
    Zip(#[from] ZipError),

    #[error("failed to read part '{part}': {source}")]
    Io {
        part: String,
        source: std::io::Error,
    },

    #[error("required part '{0}' is missing")]
    MissingPart(String),

    #[error("part '{part}' exceeds {limit} bytes")]
    PartTooLarge { part: String, limit: u64 },

    #[error("xml error in '{part}': {source}")]
    Xml {
        part: String,
        source: quick_xml::Error,
    },

    #[error("malformed part '{part}': {reason}")]
    Malformed { part: String, reason: String },

    #[error("duplicate sheet name '{0}'")]
    DuplicateSheet(String),
}

impl DecodeError {
    fn malformed(part: &str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            part: part.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure to encode a document into container bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid sheet name '{0}'")]
    InvalidSheetName(String),

    #[error("cell {sheet}!{cell} holds a non-finite number")]
    NonFiniteNumber { sheet: String, cell: CellCoord },

    #[error("cell {sheet}!{cell} holds an empty formula")]
    EmptyFormula { sheet: String, cell: CellCoord },

    #[error("cell {sheet}!{cell} contains a character that cannot be stored")]
    UnsupportedCharacter { sheet: String, cell: CellCoord },

    #[error("cell {sheet}!{cell} is outside the worksheet grid")]
    CoordinateOutOfRange { sheet: String, cell: CellCoord },
}

impl Document {
    /// Decode container bytes fetched at `revision`.
    pub fn decode(bytes: &[u8], revision: Revision) -> Result<Document, DecodeError> {
        decode(bytes, revision)
    }

    /// Encode into container bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self)
    }
}

// ============================================================================
// Decode
// ============================================================================

/// Decode container bytes into a [`Document`] tagged with `revision`.
pub fn decode(bytes: &[u8], revision: Revision) -> Result<Document, DecodeError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let workbook_path = match read_part(&mut archive, "_rels/.rels")? {
        Some(rels) => {
            let rels = parse_relationships("_rels/.rels", &rels)?;
            rels.into_iter()
                .find(|r| r.kind == OFFICE_DOCUMENT_REL)
                .map(|r| resolve_target("", &r.target))
                .unwrap_or_else(|| "xl/workbook.xml".to_string())
        }
        None => "xl/workbook.xml".to_string(),
    };
    let (workbook_dir, workbook_file) = match workbook_path.rsplit_once('/') {
        Some((dir, file)) => (dir.to_string(), file.to_string()),
        None => (String::new(), workbook_path.clone()),
    };

    let workbook = read_part(&mut archive, &workbook_path)?
        .ok_or_else(|| DecodeError::MissingPart(workbook_path.clone()))?;
    let entries = parse_workbook(&workbook_path, &workbook)?;

    let rels_path = join(&workbook_dir, &format!("_rels/{}.rels", workbook_file));
    let rels = read_part(&mut archive, &rels_path)?
        .ok_or_else(|| DecodeError::MissingPart(rels_path.clone()))?;
    let rels = parse_relationships(&rels_path, &rels)?;

    let shared_path = join(&workbook_dir, "sharedStrings.xml");
    let shared = match read_part(&mut archive, &shared_path)? {
        Some(xml) => parse_shared_strings(&shared_path, &xml)?,
        None => Vec::new(),
    };

    let mut doc = Document::new(revision);
    for entry in entries {
        validate_sheet_name(&entry.name)
            .map_err(|_| DecodeError::malformed(&workbook_path, format!("invalid sheet name '{}'", entry.name)))?;

        let rel = rels.iter().find(|r| r.id == entry.rel_id).ok_or_else(|| {
            DecodeError::malformed(&rels_path, format!("no relationship '{}'", entry.rel_id))
        })?;
        let part = resolve_target(&workbook_dir, &rel.target);
        let xml = read_part(&mut archive, &part)?
            .ok_or_else(|| DecodeError::MissingPart(part.clone()))?;

        let mut sheet = Sheet::new(entry.name);
        parse_worksheet(&part, &xml, &shared, &mut sheet)?;
        doc.push_sheet(sheet)
            .map_err(|dup| DecodeError::DuplicateSheet(dup.0))?;
    }

    Ok(doc)
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, DecodeError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let too_large = || DecodeError::PartTooLarge {
        part: name.to_string(),
        limit: MAX_PART_BYTES,
    };
    if file.size() > MAX_PART_BYTES {
        return Err(too_large());
    }

    // The declared size can lie; cap what is actually inflated.
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.by_ref()
        .take(MAX_PART_BYTES + 1)
        .read_to_end(&mut buf)
        .map_err(|source| DecodeError::Io {
            part: name.to_string(),
            source,
        })?;
    if buf.len() as u64 > MAX_PART_BYTES {
        return Err(too_large());
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| DecodeError::malformed(name, "not valid UTF-8"))
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_target(base_dir: &str, target: &str) -> String {
    let (mut segments, rest): (Vec<&str>, &str) = match target.strip_prefix('/') {
        Some(absolute) => (Vec::new(), absolute),
        None => (
            base_dir.split('/').filter(|s| !s.is_empty()).collect(),
            target,
        ),
    };
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn xml_error(part: &str) -> impl Fn(quick_xml::Error) -> DecodeError + '_ {
    move |source| DecodeError::Xml {
        part: part.to_string(),
        source,
    }
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, quick_xml::Error> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

struct Relationship {
    id: String,
    target: String,
    kind: String,
}

fn parse_relationships(part: &str, xml: &str) -> Result<Vec<Relationship>, DecodeError> {
    let err = xml_error(part);
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();

    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr(&e, b"Id").map_err(&err)?;
                let target = attr(&e, b"Target").map_err(&err)?;
                let kind = attr(&e, b"Type").map_err(&err)?.unwrap_or_default();
                match (id, target) {
                    (Some(id), Some(target)) => out.push(Relationship { id, target, kind }),
                    _ => return Err(DecodeError::malformed(part, "relationship without Id or Target")),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

struct SheetEntry {
    name: String,
    rel_id: String,
}

fn parse_workbook(part: &str, xml: &str) -> Result<Vec<SheetEntry>, DecodeError> {
    let err = xml_error(part);
    let mut reader = Reader::from_str(xml);
    let mut saw_workbook = false;
    let mut out = Vec::new();

    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"workbook" => saw_workbook = true,
                b"sheet" => {
                    let name = attr(&e, b"name").map_err(&err)?;
                    // `r:id`; the prefix varies between producers.
                    let rel_id = attr(&e, b"id").map_err(&err)?;
                    match (name, rel_id) {
                        (Some(name), Some(rel_id)) => out.push(SheetEntry { name, rel_id }),
                        _ => return Err(DecodeError::malformed(part, "sheet without name or r:id")),
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_workbook {
        return Err(DecodeError::malformed(part, "no <workbook> element"));
    }
    Ok(out)
}

fn parse_shared_strings(part: &str, xml: &str) -> Result<Vec<String>, DecodeError> {
    let err = xml_error(part);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut items = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => phonetic_depth += 1,
                // Phonetic runs carry ruby text that is not part of the value.
                b"t" if phonetic_depth == 0 => in_text = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => items.push(String::new()),
            Event::Text(t) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().map_err(&err)?);
                }
            }
            Event::CData(t) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"si" => {
                    if let Some(s) = current.take() {
                        items.push(s);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(items)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    None,
    Value,
    Formula,
    Inline,
}

struct PendingCell {
    coord: CellCoord,
    kind: Option<String>,
    value: Option<String>,
    formula: Option<String>,
    inline: Option<String>,
}

/// Row/column cursor used when `r` attributes are omitted.
struct GridCursor {
    row: u32,
    next_row: u32,
    next_col: u32,
}

impl GridCursor {
    fn open_row(&mut self, part: &str, e: &BytesStart<'_>) -> Result<(), DecodeError> {
        let row = match attr(e, b"r").map_err(xml_error(part))? {
            Some(r) => {
                let r: u64 = r
                    .parse()
                    .map_err(|_| DecodeError::malformed(part, format!("invalid row number '{}'", r)))?;
                if r == 0 || r > MAX_ROWS as u64 {
                    return Err(DecodeError::malformed(part, format!("row {} outside the grid", r)));
                }
                (r - 1) as u32
            }
            None => self.next_row,
        };
        self.row = row;
        self.next_row = row.saturating_add(1);
        self.next_col = 0;
        Ok(())
    }

    fn open_cell(&mut self, part: &str, e: &BytesStart<'_>) -> Result<PendingCell, DecodeError> {
        let err = xml_error(part);
        let coord = match attr(e, b"r").map_err(&err)? {
            Some(r) => CellCoord::parse_a1(&r).map_err(|e| DecodeError::malformed(part, e.to_string()))?,
            None => CellCoord::new(self.row, self.next_col),
        };
        if !coord.in_bounds() {
            return Err(DecodeError::malformed(part, format!("cell {} outside the grid", coord)));
        }
        self.next_col = coord.col.saturating_add(1);

        Ok(PendingCell {
            coord,
            kind: attr(e, b"t").map_err(&err)?,
            value: None,
            formula: None,
            inline: None,
        })
    }
}

fn parse_worksheet(
    part: &str,
    xml: &str,
    shared: &[String],
    sheet: &mut Sheet,
) -> Result<(), DecodeError> {
    let err = xml_error(part);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut cursor = GridCursor {
        row: 0,
        next_row: 0,
        next_col: 0,
    };
    let mut pending: Option<PendingCell> = None;
    let mut capture = Capture::None;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => cursor.open_row(part, &e)?,
                b"c" => pending = Some(cursor.open_cell(part, &e)?),
                b"v" if pending.is_some() => capture = Capture::Value,
                b"f" => {
                    if let Some(cell) = pending.as_mut() {
                        cell.formula.get_or_insert_with(String::new);
                        capture = Capture::Formula;
                    }
                }
                b"is" => {
                    if let Some(cell) = pending.as_mut() {
                        cell.inline.get_or_insert_with(String::new);
                    }
                }
                b"rPh" => phonetic_depth += 1,
                b"t" if pending.is_some() && phonetic_depth == 0 => capture = Capture::Inline,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"row" => cursor.open_row(part, &e)?,
                b"c" => {
                    let cell = cursor.open_cell(part, &e)?;
                    store_cell(part, cell, shared, sheet)?;
                }
                b"is" => {
                    if let Some(cell) = pending.as_mut() {
                        cell.inline.get_or_insert_with(String::new);
                    }
                }
                _ => {}
            },
            Event::Text(t) if capture != Capture::None => {
                let text = t.unescape().map_err(&err)?;
                push_capture(&mut pending, capture, &text);
            }
            Event::CData(t) if capture != Capture::None => {
                push_capture(&mut pending, capture, &String::from_utf8_lossy(&t));
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"f" | b"t" => capture = Capture::None,
                b"rPh" => phonetic_depth = phonetic_depth.saturating_sub(1),
                b"c" => {
                    if let Some(cell) = pending.take() {
                        store_cell(part, cell, shared, sheet)?;
                    }
                    capture = Capture::None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if pending.is_some() {
        return Err(DecodeError::malformed(part, "unterminated <c> element"));
    }
    Ok(())
}

fn push_capture(pending: &mut Option<PendingCell>, capture: Capture, text: &str) {
    let Some(cell) = pending.as_mut() else {
        return;
    };
    let target = match capture {
        Capture::Value => cell.value.get_or_insert_with(String::new),
        Capture::Formula => cell.formula.get_or_insert_with(String::new),
        Capture::Inline => cell.inline.get_or_insert_with(String::new),
        Capture::None => return,
    };
    target.push_str(text);
}

fn store_cell(
    part: &str,
    cell: PendingCell,
    shared: &[String],
    sheet: &mut Sheet,
) -> Result<(), DecodeError> {
    let reference = cell.coord;
    let bad = |what: &str, raw: &str| {
        DecodeError::malformed(part, format!("cell {}: invalid {} '{}'", reference, what, raw))
    };

    // Shared formulas (`<f t="shared" si=".."/>`) carry no text; fall back to the cached value.
    if let Some(formula) = cell.formula.filter(|f| !f.is_empty()) {
        if !storable(&formula) {
            return Err(bad("character in formula", &formula.escape_debug().to_string()));
        }
        sheet.set(cell.coord, Cell::Formula(formula));
        return Ok(());
    }

    let value = match cell.kind.as_deref() {
        Some("inlineStr") => cell.inline.map(Cell::Text),
        Some("s") => match cell.value {
            Some(raw) => {
                let idx: usize = raw.trim().parse().map_err(|_| bad("shared string index", &raw))?;
                let text = shared
                    .get(idx)
                    .ok_or_else(|| bad("shared string index", &raw))?;
                Some(Cell::Text(text.clone()))
            }
            None => None,
        },
        // Error literals (`#N/A`) and ISO dates are kept as their text.
        Some("str") | Some("e") | Some("d") => cell.value.map(Cell::Text),
        Some("b") => match cell.value.as_deref().map(str::trim) {
            Some("1") | Some("true") => Some(Cell::Boolean(true)),
            Some("0") | Some("false") => Some(Cell::Boolean(false)),
            Some(raw) => return Err(bad("boolean", raw)),
            None => None,
        },
        None | Some("n") => match cell.value {
            Some(raw) => {
                let n: f64 = raw.trim().parse().map_err(|_| bad("number", &raw))?;
                if !n.is_finite() {
                    return Err(bad("number", &raw));
                }
                Some(Cell::Number(n))
            }
            None => None,
        },
        Some(other) => return Err(bad("cell type", other)),
    };

    // Anything decoded here must encode again.
    if let Some(Cell::Text(text)) = &value
        && !storable(text)
    {
        return Err(bad("character in text", &text.escape_debug().to_string()));
    }

    if let Some(value) = value {
        sheet.set(cell.coord, value);
    }
    Ok(())
}

// ============================================================================
// Encode
// ============================================================================

/// Encode a [`Document`] into container bytes.
pub fn encode(doc: &Document) -> Result<Vec<u8>, EncodeError> {
    let mut worksheets = Vec::with_capacity(doc.sheets().len());
    for sheet in doc.sheets() {
        validate_sheet_name(sheet.name())?;
        worksheets.push(worksheet_xml(sheet)?);
    }

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buffer);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(content_types_xml(doc.sheets().len()).as_bytes())?;

        zip.start_file("_rels/.rels", options)?;
        zip.write_all(root_rels_xml().as_bytes())?;

        zip.start_file("xl/workbook.xml", options)?;
        zip.write_all(workbook_xml(doc).as_bytes())?;

        zip.start_file("xl/_rels/workbook.xml.rels", options)?;
        zip.write_all(workbook_rels_xml(doc.sheets().len()).as_bytes())?;

        for (idx, xml) in worksheets.iter().enumerate() {
            zip.start_file(format!("xl/worksheets/sheet{}.xml", idx + 1), options)?;
            zip.write_all(xml.as_bytes())?;
        }

        zip.finish()?;
    }

    Ok(buffer.into_inner())
}

fn validate_sheet_name(name: &str) -> Result<(), EncodeError> {
    let len = name.chars().count();
    let forbidden = |c: char| matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\') || c.is_control();
    if len == 0 || len > MAX_SHEET_NAME_CHARS || name.chars().any(forbidden) {
        return Err(EncodeError::InvalidSheetName(name.to_string()));
    }
    Ok(())
}

fn storable(text: &str) -> bool {
    text.chars()
        .all(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
}

fn content_types_xml(sheet_count: usize) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#);
    out.push_str(r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#);
    out.push_str(r#"<Default Extension="xml" ContentType="application/xml"/>"#);
    out.push_str(r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#);
    for idx in 1..=sheet_count {
        out.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            idx
        ));
    }
    out.push_str("</Types>");
    out
}

fn root_rels_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="{}"><Relationship Id="rId1" Type="{}" Target="xl/workbook.xml"/></Relationships>"#,
        PKG_REL_NS, OFFICE_DOCUMENT_REL
    )
}

fn workbook_xml(doc: &Document) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(&format!(
        r#"<workbook xmlns="{}" xmlns:r="{}"><sheets>"#,
        SPREADSHEET_NS, REL_NS
    ));
    for (idx, sheet) in doc.sheets().iter().enumerate() {
        out.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape(sheet.name()),
            idx + 1,
            idx + 1
        ));
    }
    out.push_str("</sheets></workbook>");
    out
}

fn workbook_rels_xml(sheet_count: usize) -> String {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(&format!(r#"<Relationships xmlns="{}">"#, PKG_REL_NS));
    for idx in 1..=sheet_count {
        out.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="{}" Target="worksheets/sheet{}.xml"/>"#,
            idx, WORKSHEET_REL, idx
        ));
    }
    out.push_str("</Relationships>");
    out
}

fn worksheet_xml(sheet: &Sheet) -> Result<String, EncodeError> {
    let mut out = String::new();
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
    out.push('\n');
    out.push_str(&format!(r#"<worksheet xmlns="{}"><sheetData>"#, SPREADSHEET_NS));

    let mut open_row: Option<u32> = None;
    for (coord, cell) in sheet.cells() {
        let err_ctx = || (sheet.name().to_string(), coord);
        if !coord.in_bounds() {
            let (sheet, cell) = err_ctx();
            return Err(EncodeError::CoordinateOutOfRange { sheet, cell });
        }

        if open_row != Some(coord.row) {
            if open_row.is_some() {
                out.push_str("</row>");
            }
            out.push_str(&format!(r#"<row r="{}">"#, coord.row as u64 + 1));
            open_row = Some(coord.row);
        }

        let r = coord.to_a1();
        match cell {
            Cell::Empty => {}
            Cell::Number(n) => {
                if !n.is_finite() {
                    let (sheet, cell) = err_ctx();
                    return Err(EncodeError::NonFiniteNumber { sheet, cell });
                }
                out.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, r, n));
            }
            Cell::Text(text) => {
                if !storable(text) {
                    let (sheet, cell) = err_ctx();
                    return Err(EncodeError::UnsupportedCharacter { sheet, cell });
                }
                out.push_str(&format!(
                    r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    r,
                    escape(text.as_str())
                ));
            }
            Cell::Boolean(b) => {
                out.push_str(&format!(r#"<c r="{}" t="b"><v>{}</v></c>"#, r, u8::from(*b)));
            }
            Cell::Formula(formula) => {
                if formula.is_empty() {
                    let (sheet, cell) = err_ctx();
                    return Err(EncodeError::EmptyFormula { sheet, cell });
                }
                if !storable(formula) {
                    let (sheet, cell) = err_ctx();
                    return Err(EncodeError::UnsupportedCharacter { sheet, cell });
                }
                out.push_str(&format!(r#"<c r="{}"><f>{}</f></c>"#, r, escape(formula.as_str())));
            }
        }
    }
    if open_row.is_some() {
        out.push_str("</row>");
    }

    out.push_str("</sheetData></worksheet>");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> Document {
        let jan = Sheet::new("Jan")
            .with_cell(CellCoord::new(0, 0), 100.0)
            .with_cell(CellCoord::new(0, 1), "rent & <utilities>")
            .with_cell(CellCoord::new(1, 0), true)
            .with_cell(CellCoord::new(2, 0), Cell::Formula("SUM(A1:A2)".to_string()))
            .with_cell(CellCoord::new(3, 2), "")
            .with_cell(CellCoord::new(4, 0), "  padded\n")
            .with_cell(CellCoord::new(5, 0), -0.000125)
            .with_cell(CellCoord::new(1_048_575, 16_383), 1e300);
        let feb = Sheet::new("Feb").with_cell(CellCoord::new(9, 9), "\"quoted\" 'text'");
        let notes = Sheet::new("A & B notes");
        Document::from_sheets(Revision::new("r1"), vec![jan, feb, notes]).unwrap()
    }

    fn zip_of(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default();
            for (name, body) in parts {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buffer.into_inner()
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let doc = budget();
        let bytes = doc.encode().unwrap();
        let decoded = Document::decode(&bytes, Revision::new("r1")).unwrap();
        assert_eq!(decoded, doc);

        let names: Vec<_> = decoded.sheets().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Jan", "Feb", "A & B notes"]);
    }

    #[test]
    fn test_empty_text_is_not_an_absent_cell() {
        let bytes = budget().encode().unwrap();
        let decoded = Document::decode(&bytes, Revision::new("r1")).unwrap();
        let jan = decoded.sheet("Jan").unwrap();
        assert_eq!(jan.cell(CellCoord::new(3, 2)), &Cell::Text(String::new()));
        assert_eq!(jan.cell(CellCoord::new(3, 3)), &Cell::Empty);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let doc = budget();
        assert_eq!(doc.encode().unwrap(), doc.encode().unwrap());
    }

    #[test]
    fn test_decode_keeps_given_revision() {
        let bytes = budget().encode().unwrap();
        let decoded = Document::decode(&bytes, Revision::new("r9")).unwrap();
        assert_eq!(decoded.revision(), &Revision::new("r9"));
    }

    #[test]
    fn test_decode_rejects_non_zip() {
        let result = Document::decode(b"definitely not a spreadsheet", Revision::new("r1"));
        assert!(matches!(result, Err(DecodeError::Zip(_))));
    }

    #[test]
    fn test_decode_rejects_missing_workbook() {
        let bytes = zip_of(&[("docProps/app.xml", "<Properties/>")]);
        let result = Document::decode(&bytes, Revision::new("r1"));
        assert!(matches!(result, Err(DecodeError::MissingPart(p)) if p == "xl/workbook.xml"));
    }

    #[test]
    fn test_decode_rejects_dangling_sheet_relationship() {
        let bytes = zip_of(&[
            (
                "xl/workbook.xml",
                r#"<workbook xmlns:r="x"><sheets><sheet name="S" sheetId="1" r:id="rId7"/></sheets></workbook>"#,
            ),
            ("xl/_rels/workbook.xml.rels", r#"<Relationships></Relationships>"#),
        ]);
        let result = Document::decode(&bytes, Revision::new("r1"));
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn test_decode_excel_style_package() {
        // Shared strings, phonetic runs, cached formula values, implicit positions,
        // and a workbook part outside the default location.
        let bytes = zip_of(&[
            (
                "_rels/.rels",
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="/book/main.xml"/>
</Relationships>"#,
            ),
            (
                "book/main.xml",
                r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:rel="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Project Setup Form" sheetId="3" rel:id="rId2"/>
    <sheet name="Lists" sheetId="1" rel:id="rId1"/>
  </sheets>
</workbook>"#,
            ),
            (
                "book/_rels/main.xml.rels",
                r#"<Relationships>
  <Relationship Id="rId1" Type="worksheet" Target="sheets/lists.xml"/>
  <Relationship Id="rId2" Type="worksheet" Target="/book/sheets/form.xml"/>
</Relationships>"#,
            ),
            (
                "book/sharedStrings.xml",
                r#"<sst count="3">
  <si><t>Branch</t></si>
  <si><r><t>North</t></r><r><t xml:space="preserve"> East</t></r><rPh sb="0" eb="1"><t>ノース</t></rPh></si>
  <si/>
</sst>"#,
            ),
            (
                "book/sheets/form.xml",
                r#"<worksheet><sheetData>
  <row r="6"><c r="C6" t="s" s="4"><v>0</v></c><c r="D6" t="s"><v>1</v></c><c r="E6" s="2"/></row>
  <row r="8"><c r="D8" t="str"><v>P-0042</v></c></row>
  <row><c><f>D8&amp;"-x"</f><v>P-0042-x</v></c><c t="b"><v>0</v></c><c t="s"><v>2</v></c></row>
  <row r="29"><c r="D29" t="e"><v>#N/A</v></c><c r="E29"><f t="shared" si="0"/><v>7.5</v></c></row>
</sheetData></worksheet>"#,
            ),
            ("book/sheets/lists.xml", r#"<worksheet><sheetData/></worksheet>"#),
        ]);

        let doc = Document::decode(&bytes, Revision::new("abc")).unwrap();
        let names: Vec<_> = doc.sheets().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Project Setup Form", "Lists"]);

        let form = doc.sheet("Project Setup Form").unwrap();
        let at = |a1: &str| form.cell(CellCoord::parse_a1(a1).unwrap()).clone();
        assert_eq!(at("C6"), Cell::Text("Branch".to_string()));
        assert_eq!(at("D6"), Cell::Text("North East".to_string()));
        assert_eq!(at("E6"), Cell::Empty);
        assert_eq!(at("D8"), Cell::Text("P-0042".to_string()));
        assert_eq!(at("A9"), Cell::Formula("D8&\"-x\"".to_string()));
        assert_eq!(at("B9"), Cell::Boolean(false));
        assert_eq!(at("C9"), Cell::Text(String::new()));
        assert_eq!(at("D29"), Cell::Text("#N/A".to_string()));
        assert_eq!(at("E29"), Cell::Number(7.5));
        assert_eq!(form.len(), 8);
        assert!(doc.sheet("Lists").unwrap().is_empty());

        // Whatever the decoder accepts must survive a round trip.
        let again = Document::decode(&doc.encode().unwrap(), Revision::new("abc")).unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn test_decode_rejects_bad_number() {
        let bytes = zip_of(&[
            (
                "xl/workbook.xml",
                r#"<workbook xmlns:r="x"><sheets><sheet name="S" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row r="1"><c r="A1"><v>twelve</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        let result = Document::decode(&bytes, Revision::new("r1"));
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    fn single_cell_package(cell_xml: &str) -> Vec<u8> {
        let sheet = format!(
            r#"<worksheet><sheetData><row r="1">{}</row></sheetData></worksheet>"#,
            cell_xml
        );
        zip_of(&[
            (
                "xl/workbook.xml",
                r#"<workbook xmlns:r="x"><sheets><sheet name="S" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#,
            ),
            ("xl/worksheets/sheet1.xml", sheet.as_str()),
        ])
    }

    #[test]
    fn test_decode_rejects_unencodable_control_characters() {
        for cell in [
            r#"<c r="A1" t="inlineStr"><is><t>a&#1;b</t></is></c>"#,
            r#"<c r="A1" t="str"><v>a&#1;b</v></c>"#,
            r#"<c r="A1"><f>CONCAT("a&#1;","b")</f><v>0</v></c>"#,
        ] {
            let result = Document::decode(&single_cell_package(cell), Revision::new("r1"));
            assert!(matches!(result, Err(DecodeError::Malformed { .. })), "{cell}");
        }

        // Tabs and newlines are storable and survive a round trip.
        let bytes = single_cell_package(r#"<c r="A1" t="inlineStr"><is><t>a&#9;b&#10;c</t></is></c>"#);
        let doc = Document::decode(&bytes, Revision::new("r1")).unwrap();
        let again = Document::decode(&doc.encode().unwrap(), Revision::new("r1")).unwrap();
        assert_eq!(again, doc);
        assert_eq!(doc.sheet("S").unwrap().cell(CellCoord::new(0, 0)), &Cell::Text("a\tb\nc".into()));
    }

    #[test]
    fn test_encode_rejects_non_finite_numbers() {
        let sheet = Sheet::new("Jan").with_cell(CellCoord::new(0, 0), f64::NAN);
        let doc = Document::from_sheets(Revision::new("r1"), vec![sheet]).unwrap();
        assert!(matches!(doc.encode(), Err(EncodeError::NonFiniteNumber { .. })));
    }

    #[test]
    fn test_encode_rejects_unstorable_sheet_names() {
        for name in ["", "a/b", "this sheet name is far too long to store"] {
            let doc = Document::from_sheets(Revision::new("r1"), vec![Sheet::new(name)]).unwrap();
            assert!(matches!(doc.encode(), Err(EncodeError::InvalidSheetName(_))), "{name}");
        }
    }

    #[test]
    fn test_encode_rejects_control_characters() {
        let sheet = Sheet::new("Jan").with_cell(CellCoord::new(0, 0), "bell\u{7}");
        let doc = Document::from_sheets(Revision::new("r1"), vec![sheet]).unwrap();
        assert!(matches!(doc.encode(), Err(EncodeError::UnsupportedCharacter { .. })));
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("xl", "/xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("xl/sub", "../worksheets/s.xml"), "xl/worksheets/s.xml");
        assert_eq!(resolve_target("", "xl/workbook.xml"), "xl/workbook.xml");
    }
}
