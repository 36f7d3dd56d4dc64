//! Header synonyms for the two logical fields a mapping row must supply.
//! New spellings are appended here; lookup order is the slice order.

use crate::mapping::MappingRow;

pub const FILENAME_KEYS: &[&str] = &["filename", "file", "fileName", "File"];

pub const CERT_ID_KEYS: &[&str] = &["certificateId", "id", "certId"];

/// First candidate key that is present with a non-empty value.
pub fn resolve<'a>(row: &'a MappingRow, candidates: &[&str]) -> Option<&'a str> {
    candidates
        .iter()
        .filter_map(|key| row.get(key))
        .find(|value| !value.is_empty())
}

pub fn filename(row: &MappingRow) -> Option<&str> {
    resolve(row, FILENAME_KEYS)
}

/// The certificate id, or the filename when no id column resolves.
pub fn cert_id<'a>(row: &'a MappingRow, filename: &'a str) -> &'a str {
    resolve(row, CERT_ID_KEYS).unwrap_or(filename)
}
