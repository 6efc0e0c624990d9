//! Directory Monitoring
//!
//! Contracts for the two watchers the synchronization core listens to: one on
//! the local bookmarks directory and one on the cloud container. Monitors push
//! snapshots of their directory through a [`MonitorEventSink`] instead of
//! calling back into the core.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{BridgeError, Result, SynchronizationError};

/// The single structured file format that is synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType {
    /// Extension without the leading dot, e.g. `kml`.
    pub extension: String,
    /// Platform type identifier, used by container queries.
    pub type_identifier: String,
}

impl FileType {
    pub fn new(extension: impl Into<String>, type_identifier: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            type_identifier: type_identifier.into(),
        }
    }

    /// Whether `path` carries this file type's extension (case-insensitive).
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }
}

impl Default for FileType {
    fn default() -> Self {
        Self::new("kml", "com.google.earth.kml")
    }
}

/// A file observed in the local bookmarks directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMetadataItem {
    pub file_name: String,
    pub file_url: PathBuf,
    pub last_modification_date: DateTime<Utc>,
}

impl LocalMetadataItem {
    pub fn new(file_url: impl Into<PathBuf>, last_modification_date: DateTime<Utc>) -> Self {
        let file_url = file_url.into();
        Self {
            file_name: file_name_of(&file_url),
            file_url,
            last_modification_date,
        }
    }

    /// Where this item lives once mirrored into `cloud_directory`.
    pub fn related_cloud_item_url(&self, cloud_directory: &Path) -> PathBuf {
        cloud_directory.join(&self.file_name)
    }
}

/// A file observed in the cloud container, with its transfer state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudMetadataItem {
    pub file_name: String,
    pub file_url: PathBuf,
    pub last_modification_date: DateTime<Utc>,
    pub is_downloaded: bool,
    pub is_downloading: bool,
    pub is_uploading: bool,
    pub has_unresolved_conflicts: bool,
    pub downloading_error: Option<SynchronizationError>,
    pub uploading_error: Option<SynchronizationError>,
}

impl CloudMetadataItem {
    /// A fully downloaded item with no pending transfers or conflicts.
    pub fn new(file_url: impl Into<PathBuf>, last_modification_date: DateTime<Utc>) -> Self {
        let file_url = file_url.into();
        Self {
            file_name: file_name_of(&file_url),
            file_url,
            last_modification_date,
            is_downloaded: true,
            is_downloading: false,
            is_uploading: false,
            has_unresolved_conflicts: false,
            downloading_error: None,
            uploading_error: None,
        }
    }

    pub fn with_downloaded(mut self, is_downloaded: bool) -> Self {
        self.is_downloaded = is_downloaded;
        self
    }

    pub fn with_downloading(mut self, is_downloading: bool) -> Self {
        self.is_downloading = is_downloading;
        self
    }

    pub fn with_uploading(mut self, is_uploading: bool) -> Self {
        self.is_uploading = is_uploading;
        self
    }

    pub fn with_unresolved_conflicts(mut self, has_unresolved_conflicts: bool) -> Self {
        self.has_unresolved_conflicts = has_unresolved_conflicts;
        self
    }

    pub fn with_downloading_error(mut self, error: SynchronizationError) -> Self {
        self.downloading_error = Some(error);
        self
    }

    pub fn with_uploading_error(mut self, error: SynchronizationError) -> Self {
        self.uploading_error = Some(error);
        self
    }

    /// Where this item lives once mirrored into `local_directory`.
    pub fn related_local_item_url(&self, local_directory: &Path) -> PathBuf {
        local_directory.join(&self.file_name)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub type LocalContents = Vec<LocalMetadataItem>;
pub type CloudContents = Vec<CloudMetadataItem>;

/// Lifecycle of a directory monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorState {
    Stopped,
    Started,
    Paused,
}

/// Everything a monitor reports to the synchronization core.
#[derive(Debug)]
pub enum MonitorEvent {
    /// First complete listing of the local directory after `start`.
    LocalContentsGathered(LocalContents),
    /// Listing of the local directory after a change.
    LocalContentsUpdated(LocalContents),
    LocalMonitorFailed(BridgeError),
    /// First complete listing of the cloud container after `start`.
    CloudContentsGathered(CloudContents),
    /// Listing of the cloud container after a change.
    CloudContentsUpdated(CloudContents),
    CloudMonitorFailed(BridgeError),
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LocalContentsGathered(_) => "local_contents_gathered",
            Self::LocalContentsUpdated(_) => "local_contents_updated",
            Self::LocalMonitorFailed(_) => "local_monitor_failed",
            Self::CloudContentsGathered(_) => "cloud_contents_gathered",
            Self::CloudContentsUpdated(_) => "cloud_contents_updated",
            Self::CloudMonitorFailed(_) => "cloud_monitor_failed",
        }
    }
}

/// Channel end a monitor publishes its events into.
pub type MonitorEventSink = mpsc::UnboundedSender<MonitorEvent>;

/// Watches one directory and reports its contents.
///
/// `start` resolves the directory being watched. After a successful start the
/// monitor must send exactly one "gathered" event, followed by "updated"
/// events for every later change. While paused no events are sent; `resume`
/// reports the current listing as an update.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::monitor::{DirectoryMonitor, MonitorState};
///
/// async fn restart(monitor: &dyn DirectoryMonitor) -> Result<()> {
///     if monitor.state() != MonitorState::Stopped {
///         monitor.stop();
///     }
///     let directory = monitor.start().await?;
///     tracing::info!(?directory, "monitoring");
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait DirectoryMonitor: Send + Sync {
    /// Start watching and return the resolved directory.
    async fn start(&self) -> Result<PathBuf>;

    fn stop(&self);

    fn pause(&self);

    fn resume(&self);

    fn state(&self) -> MonitorState;

    /// Install the channel events are delivered to. Replaces any previous sink.
    fn set_event_sink(&self, sink: MonitorEventSink);
}

/// Monitor of the on-device bookmarks directory.
pub trait LocalDirectoryMonitor: DirectoryMonitor {}

/// Monitor of the cloud container directory.
pub trait CloudDirectoryMonitor: DirectoryMonitor {}
