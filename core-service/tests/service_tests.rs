//! Service-level wiring tests with in-memory bridges.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BookmarksStore, CloudDirectoryMonitor, DirectoryMonitor, FileVersion, LifecycleChangeStream,
    LifecycleObserver, LifecycleState, LocalDirectoryMonitor, MonitorEvent, MonitorEventSink,
    MonitorState, RecentlyDeletedCategoriesManager, SettingsStore, UbiquityContainer,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventStream, SettingsEvent, SyncEvent};
use core_service::{CoreDependencies, CoreService};
use tokio::sync::mpsc;

// ============================================================================
// Fakes
// ============================================================================

/// Reports an empty directory on every start.
struct EmptyMonitor {
    cloud: bool,
    directory: PathBuf,
    state: Mutex<MonitorState>,
    sink: Mutex<Option<MonitorEventSink>>,
}

impl EmptyMonitor {
    fn new(cloud: bool) -> Arc<Self> {
        Arc::new(Self {
            cloud,
            directory: PathBuf::from(if cloud { "/cloud" } else { "/local" }),
            state: Mutex::new(MonitorState::Stopped),
            sink: Mutex::new(None),
        })
    }
}

#[async_trait]
impl DirectoryMonitor for EmptyMonitor {
    async fn start(&self) -> BridgeResult<PathBuf> {
        *self.state.lock().unwrap() = MonitorState::Started;
        if let Some(sink) = self.sink.lock().unwrap().as_ref() {
            let event = if self.cloud {
                MonitorEvent::CloudContentsGathered(Vec::new())
            } else {
                MonitorEvent::LocalContentsGathered(Vec::new())
            };
            sink.send(event).ok();
        }
        Ok(self.directory.clone())
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

impl LocalDirectoryMonitor for EmptyMonitor {}
impl CloudDirectoryMonitor for EmptyMonitor {}

struct NoopContainer;

#[async_trait]
impl UbiquityContainer for NoopContainer {
    async fn start_downloading(&self, _url: &Path) -> BridgeResult<()> {
        Ok(())
    }

    async fn trash_item(&self, url: &Path) -> BridgeResult<PathBuf> {
        Ok(url.to_path_buf())
    }

    async fn current_version(&self, _url: &Path) -> BridgeResult<Option<FileVersion>> {
        Ok(None)
    }

    async fn unresolved_conflict_versions(&self, _url: &Path) -> BridgeResult<Vec<FileVersion>> {
        Ok(Vec::new())
    }

    async fn replace_item_with_version(
        &self,
        _version: &FileVersion,
        _destination: &Path,
    ) -> BridgeResult<()> {
        Ok(())
    }

    async fn mark_versions_resolved(
        &self,
        _url: &Path,
        _versions: &[FileVersion],
    ) -> BridgeResult<()> {
        Ok(())
    }

    async fn remove_other_versions(&self, _url: &Path) -> BridgeResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemorySettings {
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
            .values
            .lock()
            .unwrap()
            .get(key)
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
struct MemoryBookmarks {
    trashed: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl BookmarksStore for MemoryBookmarks {
    async fn reload_category(&self, _path: &Path) -> BridgeResult<()> {
        Ok(())
    }

    async fn delete_category(&self, path: &Path) -> BridgeResult<()> {
        self.trashed.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

#[async_trait]
impl RecentlyDeletedCategoriesManager for MemoryBookmarks {
    async fn get_recently_deleted_categories(&self) -> BridgeResult<Vec<PathBuf>> {
        Ok(self.trashed.lock().unwrap().clone())
    }

    async fn delete_recently_deleted_categories(&self, urls: &[PathBuf]) -> BridgeResult<()> {
        self.trashed.lock().unwrap().retain(|url| !urls.contains(url));
        Ok(())
    }

    async fn recover_recently_deleted_categories(&self, urls: &[PathBuf]) -> BridgeResult<()> {
        self.delete_recently_deleted_categories(urls).await
    }
}

/// Starts in `initial` and forwards states sent through the returned channel.
struct ScriptedLifecycle {
    initial: LifecycleState,
    changes: Mutex<Option<mpsc::UnboundedReceiver<LifecycleState>>>,
}

impl ScriptedLifecycle {
    fn new(initial: LifecycleState) -> (Arc<Self>, mpsc::UnboundedSender<LifecycleState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Arc::new(Self {
            initial,
            changes: Mutex::new(Some(rx)),
        });
        (observer, tx)
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<LifecycleState>);

#[async_trait]
impl LifecycleChangeStream for ChannelStream {
    async fn next(&mut self) -> Option<LifecycleState> {
        self.0.recv().await
    }
}

#[async_trait]
impl LifecycleObserver for ScriptedLifecycle {
    async fn get_state(&self) -> BridgeResult<LifecycleState> {
        Ok(self.initial)
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn LifecycleChangeStream>> {
        let receiver = self
            .changes
            .lock()
            .unwrap()
            .take()
            .expect("subscribed twice");
        Ok(Box::new(ChannelStream(receiver)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    service: CoreService,
    settings: Arc<MemorySettings>,
    bookmarks: Arc<MemoryBookmarks>,
}

async fn harness(lifecycle: Option<Arc<dyn LifecycleObserver>>) -> Harness {
    let settings = Arc::new(MemorySettings::default());
    let bookmarks = Arc::new(MemoryBookmarks::default());

    let mut builder = CoreConfig::builder()
        .bookmarks_directory("/local")
        .cloud_directory("/cloud")
        .device_name("test-device")
        .settings_store(settings.clone());
    if let Some(observer) = lifecycle {
        builder = builder.lifecycle_observer(observer);
    }
    let config = builder.build().unwrap();

    let deps = CoreDependencies::new(
        EmptyMonitor::new(false),
        EmptyMonitor::new(true),
        Arc::new(NoopContainer),
        bookmarks.clone(),
        bookmarks.clone(),
    );
    let service = CoreService::new(config, deps).await.unwrap();

    Harness {
        service,
        settings,
        bookmarks,
    }
}

async fn wait_for(events: &mut EventStream, expected: CoreEvent) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if events.recv().await.unwrap() == expected {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", expected));
}

async fn assert_no_event(events: &mut EventStream, unexpected: CoreEvent) {
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Some(received) = events.try_recv() {
        assert_ne!(received.unwrap(), unexpected);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_enabling_starts_synchronization() {
    let h = harness(None).await;
    let mut events = h.service.events();
    h.service.start().await.unwrap();

    h.service.set_synchronization_enabled(true).await.unwrap();

    wait_for(
        &mut events,
        CoreEvent::Settings(SettingsEvent::CloudSynchronizationToggled { enabled: true }),
    )
    .await;
    wait_for(&mut events, CoreEvent::Sync(SyncEvent::Started)).await;
    wait_for(
        &mut events,
        CoreEvent::Sync(SyncEvent::InitialSynchronizationFinished),
    )
    .await;

    assert!(h.service.is_synchronization_enabled().await);
    assert_eq!(
        h.settings
            .get_bool("did_finish_initial_cloud_synchronization")
            .await
            .unwrap(),
        Some(true)
    );
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_synchronization_is_disabled_by_default() {
    let h = harness(None).await;
    let mut events = h.service.events();
    h.service.start().await.unwrap();

    assert!(!h.service.is_synchronization_enabled().await);
    assert_no_event(&mut events, CoreEvent::Sync(SyncEvent::Started)).await;
    assert!(!h.service.cloud_storage().is_synchronizing().await);
}

#[tokio::test]
async fn test_enabled_setting_starts_on_launch() {
    let h = harness(None).await;
    h.settings
        .set_bool("cloud_synchronization_enabled", true)
        .await
        .unwrap();
    let mut events = h.service.events();

    h.service.start().await.unwrap();

    wait_for(&mut events, CoreEvent::Sync(SyncEvent::Started)).await;
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_background_launch_waits_for_foreground() {
    let (observer, changes) = ScriptedLifecycle::new(LifecycleState::Background);
    let h = harness(Some(observer as Arc<dyn LifecycleObserver>)).await;
    let mut events = h.service.events();
    h.service.start().await.unwrap();

    h.service.set_synchronization_enabled(true).await.unwrap();
    assert_no_event(&mut events, CoreEvent::Sync(SyncEvent::Started)).await;

    changes.send(LifecycleState::Foreground).unwrap();
    wait_for(&mut events, CoreEvent::Sync(SyncEvent::Started)).await;

    changes.send(LifecycleState::Background).unwrap();
    wait_for(&mut events, CoreEvent::Sync(SyncEvent::Paused)).await;
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_disabling_stops_synchronization() {
    let h = harness(None).await;
    let mut events = h.service.events();
    h.service.start().await.unwrap();
    h.service.set_synchronization_enabled(true).await.unwrap();
    wait_for(&mut events, CoreEvent::Sync(SyncEvent::Started)).await;

    h.service.set_synchronization_enabled(false).await.unwrap();

    wait_for(&mut events, CoreEvent::Sync(SyncEvent::Stopped)).await;
    assert!(!h.service.cloud_storage().is_synchronizing().await);
}

#[tokio::test]
async fn test_start_twice_is_harmless() {
    let h = harness(None).await;
    h.service.start().await.unwrap();
    h.service.start().await.unwrap();
    h.service.shutdown().await;
}

#[tokio::test]
async fn test_recently_deleted_categories() {
    let h = harness(None).await;
    h.bookmarks
        .delete_category(Path::new("/local/Trip.kml"))
        .await
        .unwrap();

    let mut model = h.service.recently_deleted_categories().await.unwrap();
    assert_eq!(model.filtered_categories().len(), 1);
    assert_eq!(model.filtered_categories()[0].file_name, "Trip");

    model.recover_selected_categories().await.unwrap();
    assert!(h.bookmarks.trashed.lock().unwrap().is_empty());
}

// ============================================================================
// Desktop bootstrap
// ============================================================================

#[cfg(feature = "desktop-shims")]
mod desktop {
    use super::*;
    use bridge_desktop::SqliteSettingsStore;
    use core_service::bootstrap_desktop;

    async fn wait_for_file(path: &Path) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} never appeared", path.display()));
    }

    #[tokio::test]
    async fn test_bootstrap_requires_cloud_directory() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SqliteSettingsStore::in_memory().await.unwrap();
        let config = CoreConfig::builder()
            .bookmarks_directory(dir.path().join("bookmarks"))
            .settings_store(Arc::new(settings))
            .build()
            .unwrap();

        let result = bootstrap_desktop(config).await;
        assert!(matches!(
            result,
            Err(core_service::CoreError::CapabilityMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_initial_synchronization_between_folders() {
        let dir = tempfile::tempdir().unwrap();
        let bookmarks = dir.path().join("bookmarks");
        let cloud = dir.path().join("drive").join("bookmarks");
        std::fs::create_dir_all(&bookmarks).unwrap();
        std::fs::create_dir_all(&cloud).unwrap();
        std::fs::write(bookmarks.join("Home.kml"), "<kml>home</kml>").unwrap();
        std::fs::write(cloud.join("Trip.kml"), "<kml>trip</kml>").unwrap();

        let settings = SqliteSettingsStore::new(dir.path().join("settings.db"))
            .await
            .unwrap();
        let config = CoreConfig::builder()
            .bookmarks_directory(&bookmarks)
            .cloud_directory(&cloud)
            .device_name("laptop")
            .settings_store(Arc::new(settings))
            .build()
            .unwrap();

        let service = bootstrap_desktop(config).await.unwrap();
        let mut events = service.events();
        service.start().await.unwrap();
        service.set_synchronization_enabled(true).await.unwrap();

        wait_for(
            &mut events,
            CoreEvent::Sync(SyncEvent::InitialSynchronizationFinished),
        )
        .await;
        wait_for_file(&cloud.join("Home.kml")).await;
        wait_for_file(&bookmarks.join("Trip.kml")).await;
        service.cloud_storage().wait_until_idle().await;

        assert_eq!(
            std::fs::read_to_string(cloud.join("Home.kml")).unwrap(),
            "<kml>home</kml>"
        );
        assert_eq!(
            std::fs::read_to_string(bookmarks.join("Trip.kml")).unwrap(),
            "<kml>trip</kml>"
        );
        service.shutdown().await;
    }
}
