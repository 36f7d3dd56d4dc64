use std::path::{Path, PathBuf};

/// Filesystem convention shared by ingestion, issuance and bundling:
///
/// * `{root}/{batch_id}/` holds the extracted archive (sources + mapping)
/// * `{root}/issued/{batch_id}/` holds stamped outputs, filenames unchanged
/// * `{root}/{batch_id}_issued.zip` is the most recent download bundle
/// * `{root}/archives/` keeps the original uploads
#[derive(Clone, Debug)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extract_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join(batch_id)
    }

    pub fn issued_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join("issued").join(batch_id)
    }

    pub fn bundle_path(&self, batch_id: &str) -> PathBuf {
        self.root.join(format!("{batch_id}_issued.zip"))
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.root.join("archives")
    }
}

/// Name a mapped file is issued under. Outputs are flat, so `dir/a.pdf` is
/// written as `a.pdf` and two mapped paths with the same base name collide.
pub fn output_name(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(filename)
}
