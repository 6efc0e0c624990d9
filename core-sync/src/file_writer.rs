//! # Synchronization File Writer
//!
//! Executes [`OutgoingEvent`]s against the file system and the cloud
//! container.
//!
//! ## Overview
//!
//! The writer owns a single background task fed through an unbounded
//! channel. Operations are executed strictly one at a time in submission
//! order, and each one reports a [`WritingResult`] to its completion exactly
//! once. Every step touching a file runs under a [`CoordinationLease`] from the
//! [`FileCoordinator`] shared with the bookmarks store and the container.
//!
//! The writer never updates the bookmarks store itself: categories that must
//! be reloaded or deleted are returned in the result.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let writer = SynchronizationFileWriter::new(config, container, coordinator, clock);
//! writer.process_event(event, Box::new(|result| tracing::debug!(?result, "written")));
//! writer.flush().await;
//! ```

use std::cmp::Ordering;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use bridge_traits::{
    Clock, CloudMetadataItem, CoordinationLease, FileCoordinator, FileVersion, LocalMetadataItem,
    UbiquityContainer,
};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::events::{OutgoingEvent, WritingResult};

/// Name of the trash folder inside the cloud directory.
pub const TRASH_DIRECTORY_NAME: &str = ".Trash";

/// Invoked once with the outcome of a processed event.
pub type WritingCompletion = Box<dyn FnOnce(WritingResult) + Send + 'static>;

/// Directories and naming inputs for a writer.
#[derive(Debug, Clone)]
pub struct FileWriterConfig {
    pub local_directory: PathBuf,
    pub cloud_directory: PathBuf,
    /// Appended to initial-synchronization conflict copies.
    pub device_name: String,
}

enum WriterJob {
    Process {
        event: OutgoingEvent,
        completion: WritingCompletion,
    },
    Flush(oneshot::Sender<()>),
}

/// Serialized executor of file operations for one synchronization session.
///
/// Dropping the writer closes its queue; operations already queued still run.
pub struct SynchronizationFileWriter {
    sender: mpsc::UnboundedSender<WriterJob>,
    local_directory: PathBuf,
    cloud_directory: PathBuf,
    _worker: JoinHandle<()>,
}

impl SynchronizationFileWriter {
    /// Create the writer and spawn its worker on the current tokio runtime.
    pub fn new(
        config: FileWriterConfig,
        container: Arc<dyn UbiquityContainer>,
        coordinator: FileCoordinator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let local_directory = config.local_directory.clone();
        let cloud_directory = config.cloud_directory.clone();

        let worker = WriterWorker {
            config,
            container,
            coordinator,
            clock,
        };
        let handle = tokio::spawn(worker.run(receiver));

        Self {
            sender,
            local_directory,
            cloud_directory,
            _worker: handle,
        }
    }

    pub fn local_directory(&self) -> &Path {
        &self.local_directory
    }

    pub fn cloud_directory(&self) -> &Path {
        &self.cloud_directory
    }

    /// Queue `event`; `completion` receives its result on the worker task.
    pub fn process_event(&self, event: OutgoingEvent, completion: WritingCompletion) {
        if let Err(mpsc::error::SendError(job)) =
            self.sender.send(WriterJob::Process { event, completion })
        {
            if let WriterJob::Process { completion, .. } = job {
                completion(WritingResult::Failure(SyncError::WriterUnavailable));
            }
        }
    }

    /// Queue `event` and wait for its result.
    pub async fn process_event_and_wait(&self, event: OutgoingEvent) -> WritingResult {
        let (tx, rx) = oneshot::channel();
        self.process_event(
            event,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await
            .unwrap_or(WritingResult::Failure(SyncError::WriterUnavailable))
    }

    /// Wait until every operation queued before this call has completed.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(WriterJob::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct WriterWorker {
    config: FileWriterConfig,
    container: Arc<dyn UbiquityContainer>,
    coordinator: FileCoordinator,
    clock: Arc<dyn Clock>,
}

impl WriterWorker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<WriterJob>) {
        debug!(
            local = ?self.config.local_directory,
            cloud = ?self.config.cloud_directory,
            "File writer started"
        );

        while let Some(job) = receiver.recv().await {
            match job {
                WriterJob::Process { event, completion } => {
                    let result = self.execute(event).await;
                    completion(result);
                }
                WriterJob::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        debug!("File writer stopped");
    }

    #[instrument(skip(self, event), fields(event = %event))]
    async fn execute(&self, event: OutgoingEvent) -> WritingResult {
        let outcome = match event {
            OutgoingEvent::CreateLocalItem(item) => self.create_in_local_container(&item).await,
            OutgoingEvent::UpdateLocalItem(item) => self.write_to_local_container(&item).await,
            OutgoingEvent::RemoveLocalItem(item) => self.remove_from_local_container(&item).await,
            OutgoingEvent::StartDownloading(item) => self.start_downloading(&item).await,
            OutgoingEvent::CreateCloudItem(item) => self.create_in_cloud_container(&item).await,
            OutgoingEvent::UpdateCloudItem(item) => self.write_to_cloud_container(&item).await,
            OutgoingEvent::RemoveCloudItem(item) => self.remove_from_cloud_container(&item).await,
            OutgoingEvent::ResolveVersionsConflict(item) => {
                self.resolve_versions_conflict(&item).await
            }
            OutgoingEvent::ResolveInitialSynchronizationConflict(item) => {
                self.resolve_initial_synchronization_conflict(&item).await
            }
            OutgoingEvent::DidFinishInitialSynchronization => Ok(WritingResult::Success),
            OutgoingEvent::DidReceiveError(error) => Ok(WritingResult::Failure(error.into())),
        };

        outcome.unwrap_or_else(|error| {
            warn!(%error, "File operation failed");
            WritingResult::Failure(error)
        })
    }

    async fn lease<P: AsRef<Path>>(&self, paths: &[P]) -> Result<CoordinationLease> {
        self.coordinator
            .coordinate(paths)
            .await
            .map_err(|error| SyncError::Coordination {
                path: paths
                    .first()
                    .map(|path| path.as_ref().to_path_buf())
                    .unwrap_or_default(),
                reason: error.to_string(),
            })
    }

    // ========================================================================
    // Downloading
    // ========================================================================

    async fn start_downloading(&self, item: &CloudMetadataItem) -> Result<WritingResult> {
        debug!(file = %item.file_name, "Start downloading");
        self.container.start_downloading(&item.file_url).await?;
        Ok(WritingResult::Success)
    }

    // ========================================================================
    // Local directory
    // ========================================================================

    async fn create_in_local_container(&self, item: &CloudMetadataItem) -> Result<WritingResult> {
        let target = item.related_local_item_url(&self.config.local_directory);
        if path_exists(&target).await? {
            debug!(file = %item.file_name, "Already exists in the local directory");
            return Ok(WritingResult::Success);
        }
        self.write_to_local_container(item).await
    }

    async fn write_to_local_container(&self, item: &CloudMetadataItem) -> Result<WritingResult> {
        let target = item.related_local_item_url(&self.config.local_directory);
        let _lease = self.lease(&[&item.file_url, &target]).await?;

        copy_atomically(&item.file_url, &target, item.last_modification_date).await?;
        info!(file = %item.file_name, "Copied to the local directory");
        Ok(WritingResult::ReloadCategoriesAtUrls(vec![target]))
    }

    async fn remove_from_local_container(&self, item: &CloudMetadataItem) -> Result<WritingResult> {
        let target = item.related_local_item_url(&self.config.local_directory);
        if !path_exists(&target).await? {
            debug!(file = %item.file_name, "Not in the local directory, nothing to remove");
            return Ok(WritingResult::Success);
        }
        Ok(WritingResult::DeleteCategoriesAtUrls(vec![target]))
    }

    // ========================================================================
    // Cloud directory
    // ========================================================================

    async fn create_in_cloud_container(&self, item: &LocalMetadataItem) -> Result<WritingResult> {
        let target = item.related_cloud_item_url(&self.config.cloud_directory);
        if path_exists(&target).await? {
            debug!(file = %item.file_name, "Already exists in the cloud directory");
            return Ok(WritingResult::Success);
        }
        self.write_to_cloud_container(item).await
    }

    async fn write_to_cloud_container(&self, item: &LocalMetadataItem) -> Result<WritingResult> {
        let target = item.related_cloud_item_url(&self.config.cloud_directory);
        let _lease = self.lease(&[&item.file_url, &target]).await?;

        copy_atomically(&item.file_url, &target, item.last_modification_date).await?;
        info!(file = %item.file_name, "Copied to the cloud directory");
        Ok(WritingResult::Success)
    }

    async fn remove_from_cloud_container(&self, item: &LocalMetadataItem) -> Result<WritingResult> {
        let target = item.related_cloud_item_url(&self.config.cloud_directory);
        if !path_exists(&target).await? {
            debug!(file = %item.file_name, "Not in the cloud directory, nothing to trash");
            return Ok(WritingResult::Success);
        }

        // The trashed item's name cannot be chosen, so an older copy with the
        // same name goes first.
        if self.container.supports_trash_enumeration() {
            let trashed = self
                .config
                .cloud_directory
                .join(TRASH_DIRECTORY_NAME)
                .join(&item.file_name);
            let _lease = self.lease(&[&trashed]).await?;
            match tokio::fs::remove_file(&trashed).await {
                Ok(()) => debug!(file = %item.file_name, "Removed previous copy from the trash"),
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(SyncError::io(trashed, error)),
            }
        }

        // The container takes its own lease for the move.
        let trashed = self.container.trash_item(&target).await?;
        info!(file = %item.file_name, ?trashed, "Trashed in the cloud directory");
        Ok(WritingResult::Success)
    }

    // ========================================================================
    // Conflicts
    // ========================================================================

    async fn resolve_versions_conflict(&self, item: &CloudMetadataItem) -> Result<WritingResult> {
        let mut versions = self
            .container
            .unresolved_conflict_versions(&item.file_url)
            .await?;
        let current = self.container.current_version(&item.file_url).await?;
        let Some(current) = current.filter(|_| !versions.is_empty()) else {
            debug!(file = %item.file_name, "No versions in conflict");
            return Ok(WritingResult::Success);
        };

        versions.sort_by(newest_first);
        let latest = versions[0].clone();

        let copy_url = generate_new_file_url(&current.url, None)?;
        let _lease = self.lease(&[&current.url, &copy_url]).await?;

        // Another device may have settled the conflict meanwhile.
        let unresolved = self
            .container
            .unresolved_conflict_versions(&current.url)
            .await?;
        if unresolved.is_empty() {
            debug!(file = %item.file_name, "Conflict already resolved");
            return Ok(WritingResult::Success);
        }
        if path_exists(&copy_url).await? {
            debug!(file = %item.file_name, "Conflict copy already exists");
            self.container.remove_other_versions(&current.url).await?;
            return Ok(WritingResult::Success);
        }

        self.container
            .replace_item_with_version(&latest, &copy_url)
            .await?;

        // Both files get a fresh date so every device sees them as changed.
        let now = self.clock.now();
        set_modification_date(&current.url, now).await?;
        set_modification_date(&copy_url, now).await?;

        self.container
            .mark_versions_resolved(&current.url, &unresolved)
            .await?;
        self.container.remove_other_versions(&current.url).await?;

        info!(file = %item.file_name, copy = ?copy_url, "Resolved versions conflict");
        Ok(WritingResult::Success)
    }

    async fn resolve_initial_synchronization_conflict(
        &self,
        item: &LocalMetadataItem,
    ) -> Result<WritingResult> {
        let new_file_url = generate_new_file_url(&item.file_url, Some(&self.config.device_name))?;
        let cloud_copy_url = new_file_url
            .file_name()
            .map(|name| self.config.cloud_directory.join(name))
            .ok_or_else(|| SyncError::InvalidPath {
                path: new_file_url.clone(),
                reason: "missing file name".to_string(),
            })?;
        let _lease = self
            .lease(&[&item.file_url, &new_file_url, &cloud_copy_url])
            .await?;

        if path_exists(&new_file_url).await? {
            debug!(file = %item.file_name, "Initial conflict copy already exists");
        } else {
            copy_atomically(&item.file_url, &new_file_url, item.last_modification_date).await?;
            info!(file = %item.file_name, copy = ?new_file_url, "Kept local copy of conflicting file");
        }

        if !path_exists(&cloud_copy_url).await? {
            copy_atomically(&new_file_url, &cloud_copy_url, item.last_modification_date).await?;
            debug!(file = %item.file_name, copy = ?cloud_copy_url, "Mirrored conflict copy to the cloud directory");
        }

        Ok(WritingResult::ReloadCategoriesAtUrls(vec![new_file_url]))
    }
}

/// Newest first; versions without a date sort last, ties broken by id.
fn newest_first(a: &FileVersion, b: &FileVersion) -> Ordering {
    b.modification_date
        .cmp(&a.modification_date)
        .then_with(|| a.id.cmp(&b.id))
}

/// `<base>_1[_<device>].<ext>` next to `url`.
///
/// The name is stable so two devices resolving the same conflict at the same
/// time produce the same file.
pub fn generate_new_file_url(url: &Path, device_name: Option<&str>) -> Result<PathBuf> {
    let base = url
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| SyncError::InvalidPath {
            path: url.to_path_buf(),
            reason: "missing file name".to_string(),
        })?;

    let mut file_name = format!("{}_1", base);
    if let Some(device) = device_name {
        file_name.push('_');
        file_name.push_str(&sanitize_device_name(device));
    }
    if let Some(extension) = url.extension().and_then(|ext| ext.to_str()) {
        file_name.push('.');
        file_name.push_str(extension);
    }

    Ok(url.with_file_name(file_name))
}

fn sanitize_device_name(device_name: &str) -> String {
    device_name.replace(['/', '\\'], "-")
}

async fn path_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|error| SyncError::io(path, error))
}

/// Copy `source` to `target` through a hidden temporary file, stamping
/// `modification_date` before the final rename.
async fn copy_atomically(
    source: &Path,
    target: &Path,
    modification_date: DateTime<Utc>,
) -> Result<()> {
    let data = tokio::fs::read(source)
        .await
        .map_err(|error| SyncError::io(source, error))?;

    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| SyncError::InvalidPath {
            path: target.to_path_buf(),
            reason: "missing file name".to_string(),
        })?;
    let temporary = target.with_file_name(format!(".{}.tmp-{}", file_name, Uuid::new_v4()));

    let finished: Result<()> = async {
        tokio::fs::write(&temporary, &data)
            .await
            .map_err(|error| SyncError::io(&temporary, error))?;
        set_modification_date(&temporary, modification_date).await?;
        tokio::fs::rename(&temporary, target)
            .await
            .map_err(|error| SyncError::io(target, error))
    }
    .await;

    if finished.is_err() {
        let _ = tokio::fs::remove_file(&temporary).await;
    }
    finished
}

async fn set_modification_date(path: &Path, date: DateTime<Utc>) -> Result<()> {
    let owned = path.to_path_buf();
    let time = SystemTime::from(date);
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&owned)
            .and_then(|file| file.set_modified(time))
            .map_err(|error| SyncError::io(&owned, error))
    })
    .await
    .map_err(|error| SyncError::Coordination {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })?
}
