//! Hand-rolled bridge implementations shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BookmarksStore, BridgeError, Clock, CloudDirectoryMonitor, DirectoryMonitor, FileVersion,
    LocalDirectoryMonitor, MonitorEvent, MonitorEventSink, MonitorState, SettingsStore,
    UbiquityContainer,
};
use chrono::{DateTime, TimeZone, Utc};
use core_runtime::events::{CoreEvent, SyncEvent};
use tokio::sync::broadcast::Receiver;

pub fn date(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, minute, 0).unwrap()
}

pub fn write_file(path: &Path, contents: &str, modified: DateTime<Utc>) {
    std::fs::write(path, contents).unwrap();
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(modified)).unwrap();
}

pub fn modified(path: &Path) -> DateTime<Utc> {
    DateTime::<Utc>::from(std::fs::metadata(path).unwrap().modified().unwrap())
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

/// Wait for a sync event matching `predicate`, failing after two seconds.
pub async fn wait_for_sync_event<F>(events: &mut Receiver<CoreEvent>, predicate: F) -> SyncEvent
where
    F: Fn(&SyncEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let received = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for sync event")
            .expect("event bus closed");
        if let CoreEvent::Sync(event) = received {
            if predicate(&event) {
                return event;
            }
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Ubiquity container
// ============================================================================

/// Container over a plain directory. Conflict versions are kept in memory.
pub struct TestContainer {
    root: PathBuf,
    supports_trash_enumeration: bool,
    pub downloads: Mutex<Vec<PathBuf>>,
    pub versions: Mutex<HashMap<PathBuf, Vec<FileVersion>>>,
    pub resolved: Mutex<Vec<FileVersion>>,
    pub removed_versions: Mutex<Vec<PathBuf>>,
}

impl TestContainer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            supports_trash_enumeration: true,
            downloads: Mutex::new(Vec::new()),
            versions: Mutex::new(HashMap::new()),
            resolved: Mutex::new(Vec::new()),
            removed_versions: Mutex::new(Vec::new()),
        }
    }

    pub fn without_trash_enumeration(mut self) -> Self {
        self.supports_trash_enumeration = false;
        self
    }

    pub fn trash_directory(&self) -> PathBuf {
        self.root.join(".Trash")
    }

    pub fn add_conflict(&self, url: &Path, version: FileVersion) {
        self.versions
            .lock()
            .unwrap()
            .entry(url.to_path_buf())
            .or_default()
            .push(version);
    }
}

#[async_trait]
impl UbiquityContainer for TestContainer {
    async fn start_downloading(&self, url: &Path) -> BridgeResult<()> {
        self.downloads.lock().unwrap().push(url.to_path_buf());
        Ok(())
    }

    async fn trash_item(&self, url: &Path) -> BridgeResult<PathBuf> {
        let trash = self.trash_directory();
        std::fs::create_dir_all(&trash)?;
        let mut destination = trash.join(url.file_name().unwrap());
        if destination.exists() {
            destination = trash.join(format!("{} 2", url.file_name().unwrap().to_string_lossy()));
        }
        std::fs::rename(url, &destination)?;
        Ok(destination)
    }

    fn supports_trash_enumeration(&self) -> bool {
        self.supports_trash_enumeration
    }

    async fn current_version(&self, url: &Path) -> BridgeResult<Option<FileVersion>> {
        if !url.exists() {
            return Ok(None);
        }
        Ok(Some(FileVersion {
            id: "current".to_string(),
            url: url.to_path_buf(),
            modification_date: None,
        }))
    }

    async fn unresolved_conflict_versions(&self, url: &Path) -> BridgeResult<Vec<FileVersion>> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_item_with_version(
        &self,
        version: &FileVersion,
        destination: &Path,
    ) -> BridgeResult<()> {
        std::fs::copy(&version.url, destination)?;
        Ok(())
    }

    async fn mark_versions_resolved(&self, url: &Path, versions: &[FileVersion]) -> BridgeResult<()> {
        self.resolved.lock().unwrap().extend(versions.iter().cloned());
        if let Some(remaining) = self.versions.lock().unwrap().get_mut(url) {
            remaining.retain(|version| !versions.contains(version));
        }
        Ok(())
    }

    async fn remove_other_versions(&self, url: &Path) -> BridgeResult<()> {
        self.removed_versions.lock().unwrap().push(url.to_path_buf());
        self.versions.lock().unwrap().remove(url);
        Ok(())
    }
}

// ============================================================================
// Monitors
// ============================================================================

/// Monitor whose events are pushed by the test.
pub struct TestMonitor {
    directory: Mutex<PathBuf>,
    state: Mutex<MonitorState>,
    sink: Mutex<Option<MonitorEventSink>>,
    start_error: Mutex<Option<BridgeError>>,
    pub starts: Mutex<usize>,
}

impl TestMonitor {
    pub fn new(directory: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            directory: Mutex::new(directory.into()),
            state: Mutex::new(MonitorState::Stopped),
            sink: Mutex::new(None),
            start_error: Mutex::new(None),
            starts: Mutex::new(0),
        })
    }

    pub fn set_directory(&self, directory: impl Into<PathBuf>) {
        *self.directory.lock().unwrap() = directory.into();
    }

    pub fn fail_next_start(&self, error: BridgeError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    pub fn send(&self, event: MonitorEvent) {
        let sink = self.sink.lock().unwrap();
        sink.as_ref().expect("event sink not installed").send(event).unwrap();
    }
}

#[async_trait]
impl DirectoryMonitor for TestMonitor {
    async fn start(&self) -> BridgeResult<PathBuf> {
        if let Some(error) = self.start_error.lock().unwrap().take() {
            return Err(error);
        }
        *self.starts.lock().unwrap() += 1;
        *self.state.lock().unwrap() = MonitorState::Started;
        Ok(self.directory.lock().unwrap().clone())
    }

    fn stop(&self) {
        *self.state.lock().unwrap() = MonitorState::Stopped;
    }

    fn pause(&self) {
        *self.state.lock().unwrap() = MonitorState::Paused;
    }

    fn resume(&self) {
        *self.state.lock().unwrap() = MonitorState::Started;
    }

    fn state(&self) -> MonitorState {
        *self.state.lock().unwrap()
    }

    fn set_event_sink(&self, sink: MonitorEventSink) {
        *self.sink.lock().unwrap() = Some(sink);
    }
}

impl LocalDirectoryMonitor for TestMonitor {}
impl CloudDirectoryMonitor for TestMonitor {}

// ============================================================================
// Settings and bookmarks
// ============================================================================

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self
            .get_string(key)
            .await?
            .map(|value| value == "true"))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.values.lock().unwrap().contains_key(key))
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }

    async fn clear_all(&self) -> BridgeResult<()> {
        self.values.lock().unwrap().clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBookmarks {
    pub reloaded: Mutex<Vec<PathBuf>>,
    pub deleted: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl BookmarksStore for RecordingBookmarks {
    async fn reload_category(&self, path: &Path) -> BridgeResult<()> {
        self.reloaded.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn delete_category(&self, path: &Path) -> BridgeResult<()> {
        self.deleted.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
