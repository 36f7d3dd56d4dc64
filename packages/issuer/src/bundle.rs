use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::BundleError;
use crate::layout::WorkspaceLayout;

/// Zip every file in the batch's output directory and return the archive path.
///
/// Members are flat, sorted by name and carry a fixed timestamp, so two calls
/// over the same directory produce identical archives. A batch with nothing
/// issued has no bundle.
pub async fn bundle(layout: &WorkspaceLayout, batch_id: &str) -> Result<PathBuf, BundleError> {
    let dir = layout.issued_dir(batch_id);
    if !tokio::fs::try_exists(&dir).await? {
        return Err(BundleError::NotFound(batch_id.to_string()));
    }

    let target = layout.bundle_path(batch_id);
    let scratch = layout
        .root()
        .join(format!("{batch_id}_issued.{}.tmp", uuid::Uuid::new_v4()));

    let batch_id = batch_id.to_string();
    tokio::task::spawn_blocking(move || {
        let members = list_members(&dir)?;
        if members.is_empty() {
            return Err(BundleError::NotFound(batch_id));
        }
        write_bundle(&members, &scratch).inspect_err(|_| {
            let _ = std::fs::remove_file(&scratch);
        })?;
        std::fs::rename(&scratch, &target)?;
        tracing::debug!(path = %target.display(), members = members.len(), "Bundle written");
        Ok(target)
    })
    .await
    .map_err(|e| BundleError::Io(io::Error::other(format!("bundling task failed: {e}"))))?
}

/// Top-level files of `dir` as `(member name, path)`, sorted by name.
fn list_members(dir: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut members = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            members.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    members.sort();
    Ok(members)
}

fn write_bundle(members: &[(String, PathBuf)], target: &Path) -> Result<(), BundleError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut writer = ZipWriter::new(BufWriter::new(File::create(target)?));
    for (name, path) in members {
        writer.start_file(name.as_str(), options)?;
        io::copy(&mut File::open(path)?, &mut writer)?;
    }
    writer.finish()?;

    Ok(())
}
