//! # Desktop Directory Monitors
//!
//! File-system watchers for the local bookmarks directory and the cloud
//! container folder.
//!
//! ## Overview
//!
//! Both monitors watch their directory with `notify`. Raw events are
//! debounced, then the directory is listed again and the full listing is sent
//! to the event sink, so the core never sees partial writes.
//!
//! - `start` resolves and prepares the directory, sends one "gathered"
//!   listing, then an "updated" listing after each burst of changes
//! - `pause` suppresses listings; `resume` sends a fresh one
//! - `stop` ends the watcher task
//!
//! The cloud monitor also reports files with entries under
//! `.Versions/<file_name>/` as having unresolved conflicts.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    CloudDirectoryMonitor, CloudMetadataItem, DirectoryMonitor, FileType, LocalDirectoryMonitor,
    LocalMetadataItem, MonitorEvent, MonitorEventSink, MonitorState, SynchronizationError,
};
use chrono::{DateTime, Utc};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ubiquity::{list_versions, versions_directory};

/// Quiet period after the last file-system event before rescanning.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorKind {
    Local,
    Cloud,
}

impl MonitorKind {
    fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }

    /// The cloud watcher is recursive so new conflict versions trigger a rescan.
    fn recursive_mode(self) -> RecursiveMode {
        match self {
            Self::Local => RecursiveMode::NonRecursive,
            Self::Cloud => RecursiveMode::Recursive,
        }
    }

    fn open_error(self) -> SynchronizationError {
        match self {
            Self::Local => SynchronizationError::FailedToOpenLocalDirectoryFileDescriptor,
            Self::Cloud => SynchronizationError::ContainerNotFound,
        }
    }

    fn listing_error(self) -> SynchronizationError {
        match self {
            Self::Local => SynchronizationError::FailedToRetrieveLocalDirectoryContent,
            Self::Cloud => SynchronizationError::ICloudIsNotAvailable,
        }
    }
}

// ============================================================================
// Shared watcher
// ============================================================================

struct Session {
    cancellation_token: CancellationToken,
    paused: Arc<AtomicBool>,
    rescan: Arc<Notify>,
}

type SharedSink = Arc<Mutex<Option<MonitorEventSink>>>;

struct WatchedDirectory {
    kind: MonitorKind,
    directory: PathBuf,
    file_type: FileType,
    debounce: Duration,
    sink: SharedSink,
    session: Mutex<Option<Session>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl WatchedDirectory {
    fn new(kind: MonitorKind, directory: PathBuf, file_type: FileType) -> Self {
        Self {
            kind,
            directory,
            file_type,
            debounce: DEFAULT_DEBOUNCE,
            sink: Arc::new(Mutex::new(None)),
            session: Mutex::new(None),
        }
    }

    async fn prepare_directory(&self) -> Result<()> {
        if self.kind == MonitorKind::Cloud {
            let parent_exists = match self.directory.parent() {
                Some(parent) => tokio::fs::try_exists(parent).await.unwrap_or(false),
                None => false,
            };
            if !parent_exists {
                return Err(SynchronizationError::ContainerNotFound.into());
            }
        }

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| {
                warn!(monitor = self.kind.name(), directory = ?self.directory, error = %e, "Cannot prepare directory");
                BridgeError::from(self.kind.open_error())
            })
    }

    async fn start(&self) -> Result<PathBuf> {
        if lock(&self.session).is_some() {
            debug!(monitor = self.kind.name(), "Monitor already started");
            return Ok(self.directory.clone());
        }

        self.prepare_directory().await?;

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = raw_tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to create watcher: {}", e)))?;
        watcher
            .watch(&self.directory, self.kind.recursive_mode())
            .map_err(|e| {
                warn!(monitor = self.kind.name(), error = %e, "Failed to watch directory");
                BridgeError::from(self.kind.open_error())
            })?;

        let session = Session {
            cancellation_token: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            rescan: Arc::new(Notify::new()),
        };
        let task = WatchTask {
            kind: self.kind,
            directory: self.directory.clone(),
            file_type: self.file_type.clone(),
            debounce: self.debounce,
            sink: Arc::clone(&self.sink),
            cancellation_token: session.cancellation_token.clone(),
            paused: Arc::clone(&session.paused),
            rescan: Arc::clone(&session.rescan),
        };

        let mut slot = lock(&self.session);
        if slot.is_some() {
            // Lost a race with a concurrent start; the other session wins.
            return Ok(self.directory.clone());
        }
        *slot = Some(session);
        tokio::spawn(task.run(watcher, raw_rx));

        info!(monitor = self.kind.name(), directory = ?self.directory, "Monitor started");
        Ok(self.directory.clone())
    }

    fn stop(&self) {
        if let Some(session) = lock(&self.session).take() {
            session.cancellation_token.cancel();
            info!(monitor = self.kind.name(), "Monitor stopped");
        }
    }

    fn pause(&self) {
        if let Some(session) = lock(&self.session).as_ref() {
            session.paused.store(true, Ordering::SeqCst);
            debug!(monitor = self.kind.name(), "Monitor paused");
        }
    }

    fn resume(&self) {
        if let Some(session) = lock(&self.session).as_ref() {
            if session.paused.swap(false, Ordering::SeqCst) {
                session.rescan.notify_one();
                debug!(monitor = self.kind.name(), "Monitor resumed");
            }
        }
    }

    fn state(&self) -> MonitorState {
        match lock(&self.session).as_ref() {
            None => MonitorState::Stopped,
            Some(session) if session.paused.load(Ordering::SeqCst) => MonitorState::Paused,
            Some(_) => MonitorState::Started,
        }
    }

    fn set_event_sink(&self, sink: MonitorEventSink) {
        *lock(&self.sink) = Some(sink);
    }
}

impl Drop for WatchedDirectory {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Watch task
// ============================================================================

struct WatchTask {
    kind: MonitorKind,
    directory: PathBuf,
    file_type: FileType,
    debounce: Duration,
    sink: SharedSink,
    cancellation_token: CancellationToken,
    paused: Arc<AtomicBool>,
    rescan: Arc<Notify>,
}

impl WatchTask {
    async fn run(
        self,
        watcher: RecommendedWatcher,
        mut raw_events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    ) {
        // Dropping the watcher unregisters it.
        let _watcher = watcher;

        self.publish(true).await;

        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = self.rescan.notified() => {
                    deadline = None;
                    self.publish(false).await;
                }
                Some(res) = raw_events.recv() => match res {
                    Ok(event) if is_relevant(&event) => {
                        deadline = Some(Instant::now() + self.debounce);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(monitor = self.kind.name(), error = %e, "Watcher error"),
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    if !self.paused.load(Ordering::SeqCst) {
                        self.publish(false).await;
                    }
                }
            }
        }
        debug!(monitor = self.kind.name(), "Watch task finished");
    }

    async fn publish(&self, gathered: bool) {
        let event = match self.kind {
            MonitorKind::Local => self.local_event(gathered).await,
            MonitorKind::Cloud => self.cloud_event(gathered).await,
        };
        if self.cancellation_token.is_cancelled() {
            return;
        }

        debug!(monitor = self.kind.name(), event = event.name(), "Publishing listing");
        if let Some(sink) = lock(&self.sink).as_ref() {
            sink.send(event).ok();
        }
    }

    async fn local_event(&self, gathered: bool) -> MonitorEvent {
        match list_files(&self.directory, &self.file_type).await {
            Ok(files) => {
                let contents = files
                    .into_iter()
                    .map(|(url, modified)| LocalMetadataItem::new(url, modified))
                    .collect();
                if gathered {
                    MonitorEvent::LocalContentsGathered(contents)
                } else {
                    MonitorEvent::LocalContentsUpdated(contents)
                }
            }
            Err(e) => {
                warn!(directory = ?self.directory, error = %e, "Failed to list local directory");
                MonitorEvent::LocalMonitorFailed(self.kind.listing_error().into())
            }
        }
    }

    async fn cloud_event(&self, gathered: bool) -> MonitorEvent {
        let files = match list_files(&self.directory, &self.file_type).await {
            Ok(files) => files,
            Err(e) => {
                warn!(directory = ?self.directory, error = %e, "Failed to list cloud directory");
                let error = if e.kind() == io::ErrorKind::NotFound {
                    SynchronizationError::ContainerNotFound
                } else {
                    self.kind.listing_error()
                };
                return MonitorEvent::CloudMonitorFailed(error.into());
            }
        };

        let mut contents = Vec::with_capacity(files.len());
        for (url, modified) in files {
            let file_name = url
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let has_conflicts = match list_versions(&versions_directory(&self.directory, &file_name)).await {
                Ok(versions) => !versions.is_empty(),
                Err(e) => {
                    warn!(file = %file_name, error = %e, "Failed to list versions");
                    false
                }
            };
            contents.push(CloudMetadataItem::new(url, modified).with_unresolved_conflicts(has_conflicts));
        }

        if gathered {
            MonitorEvent::CloudContentsGathered(contents)
        } else {
            MonitorEvent::CloudContentsUpdated(contents)
        }
    }
}

fn is_relevant(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_))
}

/// Visible files of `file_type` directly inside `directory`, sorted by name.
async fn list_files(
    directory: &Path,
    file_type: &FileType,
) -> io::Result<Vec<(PathBuf, DateTime<Utc>)>> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !file_type.matches(&path) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Removed between listing and stat.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }
        files.push((path, DateTime::<Utc>::from(metadata.modified()?)));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

// ============================================================================
// Public monitors
// ============================================================================

/// Watches the local bookmarks directory, creating it when missing.
pub struct DesktopLocalDirectoryMonitor {
    watched: WatchedDirectory,
}

impl DesktopLocalDirectoryMonitor {
    pub fn new(directory: impl Into<PathBuf>, file_type: FileType) -> Self {
        Self {
            watched: WatchedDirectory::new(MonitorKind::Local, directory.into(), file_type),
        }
    }

    /// Override the quiet period before a rescan.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.watched.debounce = debounce;
        self
    }
}

/// Watches the cloud container folder.
///
/// The folder itself is created on start, but its parent (the mounted cloud
/// drive) must exist; otherwise start fails with `ContainerNotFound`.
pub struct DesktopCloudDirectoryMonitor {
    watched: WatchedDirectory,
}

impl DesktopCloudDirectoryMonitor {
    pub fn new(directory: impl Into<PathBuf>, file_type: FileType) -> Self {
        Self {
            watched: WatchedDirectory::new(MonitorKind::Cloud, directory.into(), file_type),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.watched.debounce = debounce;
        self
    }
}

macro_rules! impl_directory_monitor {
    ($monitor:ty) => {
        #[async_trait]
        impl DirectoryMonitor for $monitor {
            async fn start(&self) -> Result<PathBuf> {
                self.watched.start().await
            }

            fn stop(&self) {
                self.watched.stop()
            }

            fn pause(&self) {
                self.watched.pause()
            }

            fn resume(&self) {
                self.watched.resume()
            }

            fn state(&self) -> MonitorState {
                self.watched.state()
            }

            fn set_event_sink(&self, sink: MonitorEventSink) {
                self.watched.set_event_sink(sink)
            }
        }
    };
}

impl_directory_monitor!(DesktopLocalDirectoryMonitor);
impl_directory_monitor!(DesktopCloudDirectoryMonitor);

impl LocalDirectoryMonitor for DesktopLocalDirectoryMonitor {}
impl CloudDirectoryMonitor for DesktopCloudDirectoryMonitor {}
