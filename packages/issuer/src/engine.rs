use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{Batch, BatchEvent, BatchStatus, IssuanceConfig, QrPosition, ResultItem};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{Instrument, instrument};

use crate::archive::list_files;
use crate::broadcast::Broadcaster;
use crate::error::{IssuanceError, ItemError};
use crate::layout::{WorkspaceLayout, output_name};
use crate::project::ProjectLookup;
use crate::stamp::{self, StampGeometry};
use crate::store::BatchStore;

pub const REASON_MISSING_SOURCE: &str = "missing source";

/// Default mount point of the batch API, used to build download links.
pub const DEFAULT_DOWNLOAD_PREFIX: &str = "/api/v1/batches";

/// Sequential stamping of a batch's mapping rows.
///
/// Runs are two-phase: [`start`](Self::start) or [`retry_failed`](Self::retry_failed)
/// performs setup and returns an [`IssuanceRun`]; the run's loop is then driven
/// with [`IssuanceRun::execute`] or [`IssuanceRun::spawn`]. Setup failures leave
/// the batch status untouched.
#[derive(Clone)]
pub struct IssuanceEngine {
    store: Arc<dyn BatchStore>,
    projects: Arc<dyn ProjectLookup>,
    events: Broadcaster,
    layout: WorkspaceLayout,
    config: Arc<IssuanceConfig>,
    download_prefix: String,
    running: Arc<DashMap<String, ()>>,
}

/// One row to attempt. `index` is its slot in the batch's result sequence.
#[derive(Clone, Debug, PartialEq)]
struct Target {
    index: usize,
    cert_id: String,
    filename: String,
}

impl IssuanceEngine {
    pub fn new(
        store: Arc<dyn BatchStore>,
        projects: Arc<dyn ProjectLookup>,
        events: Broadcaster,
        layout: WorkspaceLayout,
        config: IssuanceConfig,
    ) -> Self {
        Self {
            store,
            projects,
            events,
            layout,
            config: Arc::new(config),
            download_prefix: DEFAULT_DOWNLOAD_PREFIX.to_string(),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn with_download_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.download_prefix = prefix.into();
        self
    }

    pub fn events(&self) -> &Broadcaster {
        &self.events
    }

    pub fn is_running(&self, batch_id: &str) -> bool {
        self.running.contains_key(batch_id)
    }

    /// Replay the whole mapping, replacing any previous results.
    #[instrument(skip(self))]
    pub async fn start(&self, batch_id: &str) -> Result<IssuanceRun, IssuanceError> {
        let batch = self.store.get(batch_id).await?;
        let guard = RunGuard::acquire(&self.running, batch_id)?;

        self.prepare_output(batch_id).await?;
        let sources = self.source_files(batch_id).await?;
        let targets = self.load_targets(&batch, &sources);
        let position = self.position_for(&batch).await;

        self.store
            .finish(batch_id, BatchStatus::Processing, &[])
            .await?;

        tracing::info!(targets = targets.len(), "Issuance started");

        Ok(IssuanceRun {
            engine: self.clone(),
            batch_id: batch_id.to_string(),
            targets,
            sources,
            results: Vec::new(),
            position,
            _guard: guard,
        })
    }

    /// Re-attempt only the `failed` results of a completed batch, in place.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self, batch_id: &str) -> Result<IssuanceRun, IssuanceError> {
        let batch = self.store.get(batch_id).await?;
        if batch.status != BatchStatus::Completed {
            return Err(IssuanceError::NotRetryable {
                id: batch.id,
                status: batch.status,
            });
        }
        let guard = RunGuard::acquire(&self.running, batch_id)?;

        self.prepare_output(batch_id).await?;
        let sources = self.source_files(batch_id).await?;
        let position = self.position_for(&batch).await;

        let targets: Vec<Target> = batch
            .results
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_issued())
            .map(|(index, item)| Target {
                index,
                cert_id: item.cert_id.clone(),
                filename: item.filename.clone(),
            })
            .collect();

        self.store
            .set_status(batch_id, BatchStatus::Processing)
            .await?;

        tracing::info!(targets = targets.len(), "Retrying failed items");

        Ok(IssuanceRun {
            engine: self.clone(),
            batch_id: batch_id.to_string(),
            targets,
            sources,
            results: batch.results,
            position,
            _guard: guard,
        })
    }

    fn geometry(&self) -> StampGeometry {
        StampGeometry {
            size: self.config.qr_size,
            margin: self.config.qr_margin,
        }
    }

    fn download_url(&self, batch_id: &str, output_name: &str) -> String {
        format!(
            "{}/{}/files/{}",
            self.download_prefix.trim_end_matches('/'),
            batch_id,
            stamp::encode_component(output_name)
        )
    }

    async fn prepare_output(&self, batch_id: &str) -> Result<(), IssuanceError> {
        let dir = self.layout.issued_dir(batch_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| IssuanceError::Storage {
                path: dir.clone(),
                source,
            })
    }

    async fn source_files(&self, batch_id: &str) -> Result<HashSet<String>, IssuanceError> {
        let dir = self.layout.extract_dir(batch_id);
        match list_files(&dir).await {
            Ok(files) => Ok(files.into_iter().collect()),
            Err(source) => Err(IssuanceError::Storage { path: dir, source }),
        }
    }

    /// Rows validated at upload, or every extracted PDF when the mapping the
    /// batch was validated against is no longer on disk.
    ///
    /// A target whose output name is already taken is dropped.
    fn load_targets(&self, batch: &Batch, sources: &HashSet<String>) -> Vec<Target> {
        let mapping_present = batch
            .mapping_ref
            .as_deref()
            .is_some_and(|name| sources.contains(name));

        let rows: Vec<(String, String)> = if mapping_present {
            batch
                .targets
                .iter()
                .map(|t| (t.cert_id.clone(), t.filename.clone()))
                .collect()
        } else {
            tracing::warn!(
                mapping = ?batch.mapping_ref,
                "Mapping file missing at issuance time, falling back to PDF listing"
            );
            let mut pdfs: Vec<&String> = sources
                .iter()
                .filter(|name| name.to_ascii_lowercase().ends_with(".pdf"))
                .collect();
            pdfs.sort();
            pdfs.into_iter()
                .enumerate()
                .map(|(i, name)| (format!("id-{i}"), name.clone()))
                .collect()
        };

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(rows.len());
        for (cert_id, filename) in rows {
            if !seen.insert(output_name(&filename).to_string()) {
                tracing::warn!(%filename, "Skipping row with an already issued output name");
                continue;
            }
            targets.push(Target {
                index: targets.len(),
                cert_id,
                filename,
            });
        }
        targets
    }

    async fn position_for(&self, batch: &Batch) -> Option<QrPosition> {
        let project_id = batch.project_id?;
        match self.projects.qr_position(project_id).await {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!(project_id, error = %e, "Project lookup failed, using default placement");
                None
            }
        }
    }
}

/// Marks a batch as having a run in flight; released on drop.
struct RunGuard {
    running: Arc<DashMap<String, ()>>,
    batch_id: String,
}

impl RunGuard {
    fn acquire(running: &Arc<DashMap<String, ()>>, batch_id: &str) -> Result<Self, IssuanceError> {
        match running.entry(batch_id.to_string()) {
            Entry::Occupied(_) => Err(IssuanceError::AlreadyRunning(batch_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self {
                    running: running.clone(),
                    batch_id: batch_id.to_string(),
                })
            }
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.remove(&self.batch_id);
    }
}

/// A prepared run holding the batch's run guard until it finishes or is dropped.
pub struct IssuanceRun {
    engine: IssuanceEngine,
    batch_id: String,
    targets: Vec<Target>,
    sources: HashSet<String>,
    results: Vec<ResultItem>,
    position: Option<QrPosition>,
    _guard: RunGuard,
}

impl IssuanceRun {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Rows this run will attempt.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Drive the loop on a background task.
    pub fn spawn(self) -> JoinHandle<Vec<ResultItem>> {
        let span = tracing::info_span!("issuance", batch_id = %self.batch_id);
        tokio::spawn(self.execute().instrument(span))
    }

    /// Attempt every target in order. Row failures become `failed` results;
    /// the batch always ends `completed`.
    pub async fn execute(mut self) -> Vec<ResultItem> {
        let engine = self.engine.clone();
        let pace = Duration::from_millis(engine.config.pace_ms);
        let targets = std::mem::take(&mut self.targets);
        let total = targets.len();
        let mut issued = 0;

        for (attempted, target) in targets.iter().enumerate() {
            if attempted > 0 && !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }

            let item = self.issue(target).await;
            if item.is_issued() {
                issued += 1;
            }
            match self.results.get_mut(target.index) {
                Some(slot) => *slot = item,
                None => self.results.push(item),
            }

            if let Err(e) = engine
                .store
                .set_results(&self.batch_id, &self.results)
                .await
            {
                tracing::warn!(error = %e, "Failed to persist partial results");
            }

            engine.events.publish(BatchEvent::Update {
                batch_id: self.batch_id.clone(),
                attempted: attempted + 1,
                issued,
                total,
            });
        }

        if let Err(e) = engine
            .store
            .finish(&self.batch_id, BatchStatus::Completed, &self.results)
            .await
        {
            tracing::error!(error = %e, "Failed to persist final results");
        }

        tracing::info!(issued, total, "Issuance completed");

        engine.events.publish(BatchEvent::Completed {
            batch_id: self.batch_id.clone(),
            results: self.results.clone(),
        });

        std::mem::take(&mut self.results)
    }

    async fn issue(&self, target: &Target) -> ResultItem {
        let missing = || {
            tracing::warn!(filename = %target.filename, "Source file missing");
            ResultItem::failed(
                target.cert_id.clone(),
                target.filename.clone(),
                REASON_MISSING_SOURCE,
            )
        };

        if !self.sources.contains(&target.filename) {
            return missing();
        }

        let path = self.engine.layout.extract_dir(&self.batch_id).join(&target.filename);
        let source = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return missing(),
            Err(e) => return self.failed(target, ItemError::Io(e)),
        };

        match self.stamp(source, target).await {
            Ok(output_name) => ResultItem::issued(
                target.cert_id.clone(),
                target.filename.clone(),
                self.engine.download_url(&self.batch_id, &output_name),
            ),
            Err(e) => self.failed(target, e),
        }
    }

    fn failed(&self, target: &Target, err: ItemError) -> ResultItem {
        tracing::warn!(filename = %target.filename, error = %err, "Certificate failed");
        ResultItem::failed(
            target.cert_id.clone(),
            target.filename.clone(),
            err.to_string(),
        )
    }

    /// Stamp `source` and write it under the batch's output directory.
    async fn stamp(&self, source: Vec<u8>, target: &Target) -> Result<String, ItemError> {
        let payload = stamp::verify_url(&self.engine.config.verify_base_url, &target.cert_id);
        let position = self.position;
        let geometry = self.engine.geometry();

        let stamped = tokio::task::spawn_blocking(move || {
            let qr = stamp::render_qr(&payload)?;
            stamp::stamp_first_page(&source, &qr, position, geometry)
        })
        .await
        .map_err(|e| ItemError::Pdf(format!("stamping task failed: {e}")))??;

        let name = output_name(&target.filename);
        let dir = self.engine.layout.issued_dir(&self.batch_id);
        fs::write(dir.join(name), stamped).await?;

        Ok(name.to_string())
    }
}
