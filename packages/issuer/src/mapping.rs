//! Tabular mapping payloads (CSV or spreadsheet) turned into ordered rows.
//!
//! Field names are returned exactly as they appear in the header row; choosing
//! which header means "filename" or "certificate id" is left to [`crate::fields`].

use std::io::Cursor;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::MappingError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Declared encoding of a mapping payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingKind {
    DelimitedText,
    Spreadsheet,
}

impl MappingKind {
    /// Infer the kind from a file extension (case-insensitive).
    pub fn from_filename(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::DelimitedText),
            "xlsx" | "xls" => Some(Self::Spreadsheet),
            _ => None,
        }
    }
}

/// One data row, keyed by header name, in header order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingRow {
    fields: Vec<(String, String)>,
}

impl MappingRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field. A repeated header overwrites the earlier value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MappingRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = MappingRow::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl Serialize for MappingRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Parse a mapping payload into rows, one per data row, in source order.
pub fn parse(data: &[u8], kind: MappingKind) -> Result<Vec<MappingRow>, MappingError> {
    match kind {
        MappingKind::DelimitedText => parse_delimited(data),
        MappingKind::Spreadsheet => parse_spreadsheet(data),
    }
}

fn parse_delimited(data: &[u8]) -> Result<Vec<MappingRow>, MappingError> {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(MappingError::Format("mapping file is empty".into()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| MappingError::Format(format!("invalid header row: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| MappingError::Format(format!("row {}: {e}", line + 1)))?;
        // Missing trailing columns read as empty strings.
        let row = headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header, record.get(i).unwrap_or("")))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

fn parse_spreadsheet(data: &[u8]) -> Result<Vec<MappingRow>, MappingError> {
    if data.is_empty() {
        return Err(MappingError::Format("mapping file is empty".into()));
    }

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| MappingError::Format(format!("unreadable spreadsheet: {e}")))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| MappingError::Format("spreadsheet has no sheets".into()))?
        .map_err(|e| MappingError::Format(format!("unreadable first sheet: {e}")))?;

    let mut sheet_rows = range.rows();
    let Some(header_row) = sheet_rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| cell_text(cell).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for cells in sheet_rows {
        if cells.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let row = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(i, header)| {
                let value = cells.get(i).map(cell_text).unwrap_or_default();
                (header.clone(), value)
            })
            .collect();
        rows.push(row);
    }

    Ok(rows)
}

/// Render a cell the way it reads in the sheet; whole floats drop the `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => other.to_string(),
    }
}
