use std::io::Read;
use std::path::Path;

use tokio::fs;

use crate::error::{ArchiveError, MappingError};
use crate::mapping::{self, MappingKind, MappingRow};

/// Conventional stem of the mapping file; it beats any other spreadsheet or CSV.
pub const MAPPING_STEM: &str = "certificate_map";

/// Maximum decompressed size per archive entry (128 MB).
const MAX_DECOMPRESSED_ENTRY_SIZE: u64 = 128 * 1024 * 1024;

/// Maximum total decompressed size across all entries (2048 MB).
const MAX_TOTAL_DECOMPRESSED_SIZE: u64 = 2048 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/`-separated.
    pub name: String,
    pub data: Vec<u8>,
}

/// An uploaded ZIP held in memory, directories dropped.
#[derive(Debug, Clone)]
pub struct Archive {
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ArchiveError> {
        let cursor = std::io::Cursor::new(data);
        let mut archive =
            zip::ZipArchive::new(cursor).map_err(|e| ArchiveError::Invalid(e.to_string()))?;

        let mut entries = Vec::with_capacity(archive.len());
        let mut total_decompressed: u64 = 0;

        for i in 0..archive.len() {
            let file = archive
                .by_index(i)
                .map_err(|e| ArchiveError::Invalid(e.to_string()))?;

            if file.is_dir() {
                continue;
            }

            // Reject entries with path traversal components (e.g. "../").
            let name = match file.enclosed_name() {
                Some(path) => path.to_string_lossy().replace('\\', "/"),
                None => {
                    tracing::warn!(entry = %file.name(), "Skipping archive entry outside extraction root");
                    continue;
                }
            };

            let mut buf = Vec::new();
            file.take(MAX_DECOMPRESSED_ENTRY_SIZE + 1)
                .read_to_end(&mut buf)
                .map_err(|e| ArchiveError::Invalid(format!("Failed to read '{name}': {e}")))?;

            if buf.len() as u64 > MAX_DECOMPRESSED_ENTRY_SIZE {
                return Err(ArchiveError::TooLarge {
                    name,
                    limit: MAX_DECOMPRESSED_ENTRY_SIZE,
                });
            }

            total_decompressed += buf.len() as u64;
            if total_decompressed > MAX_TOTAL_DECOMPRESSED_SIZE {
                return Err(ArchiveError::TooLarge {
                    name,
                    limit: MAX_TOTAL_DECOMPRESSED_SIZE,
                });
            }

            entries.push(ArchiveEntry { name, data: buf });
        }

        Ok(Self { entries })
    }

    /// Non-directory entry names in archive order.
    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// The mapping entry chosen by [`locate_mapping`].
    pub fn mapping_entry(&self) -> Result<&ArchiveEntry, ArchiveError> {
        let name = locate_mapping(self.entry_names()).ok_or(ArchiveError::NoMappingFile)?;
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or(ArchiveError::NoMappingFile)
    }

    /// Locate and parse the mapping file.
    pub fn read_mapping(&self) -> Result<Vec<MappingRow>, ArchiveMappingError> {
        let entry = self.mapping_entry()?;
        let kind = MappingKind::from_filename(&entry.name).ok_or(ArchiveError::NoMappingFile)?;
        Ok(mapping::parse(&entry.data, kind)?)
    }

    /// Write every entry under `dir`, replacing whatever a previous call left there.
    pub async fn extract_to(&self, dir: &Path) -> Result<(), ArchiveError> {
        fs::create_dir_all(dir)
            .await
            .map_err(|source| ArchiveError::Storage {
                path: dir.to_path_buf(),
                source,
            })?;

        for entry in &self.entries {
            let target = dir.join(&entry.name);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ArchiveError::Storage {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
            fs::write(&target, &entry.data)
                .await
                .map_err(|source| ArchiveError::Storage {
                    path: target.clone(),
                    source,
                })?;
        }

        Ok(())
    }
}

/// Either the mapping could not be found or it could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveMappingError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Mapping(#[from] MappingError),
}

/// Pick the mapping file among `names`.
///
/// Priority: `certificate_map.{xlsx,xls,csv}` (any directory, any case), then the
/// first spreadsheet, then the first CSV. Ties go to the earliest name.
pub fn locate_mapping<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();

    let conventional = names.iter().find(|name| {
        let base = basename(name).to_ascii_lowercase();
        base.strip_prefix(MAPPING_STEM)
            .is_some_and(|rest| matches!(rest, ".xlsx" | ".xls" | ".csv"))
    });
    if let Some(name) = conventional {
        return Some(*name);
    }

    let by_kind = |kind: MappingKind| {
        names
            .iter()
            .find(|name| MappingKind::from_filename(name) == Some(kind))
            .copied()
    };

    by_kind(MappingKind::Spreadsheet).or_else(|| by_kind(MappingKind::DelimitedText))
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Relative, `/`-separated paths of every file below `dir`, sorted.
pub async fn list_files(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut read_dir = fs::read_dir(&current).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(dir) {
                files.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }

    files.sort();
    Ok(files)
}
