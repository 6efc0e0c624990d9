//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (directory monitors,
//! cloud container, bookmarks store, settings, lifecycle) into the
//! synchronization core. Desktop apps typically enable the `desktop-shims`
//! feature (which depends on `bridge-desktop`) and call
//! [`bootstrap_desktop`]; other hosts build a [`CoreDependencies`] from their
//! own adapters.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::bootstrap_desktop;
//!
//! let config = CoreConfig::builder()
//!     .bookmarks_directory("/home/anna/.local/share/maps/bookmarks")
//!     .cloud_directory("/home/anna/CloudDrive/Maps/bookmarks")
//!     .build()?;
//!
//! let core = bootstrap_desktop(config).await?;
//! core.start().await?;
//! core.set_synchronization_enabled(true).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::{Arc, Mutex};

use bridge_traits::{
    BookmarksStore, Clock, CloudDirectoryMonitor, FileCoordinator, LifecycleState,
    LocalDirectoryMonitor, RecentlyDeletedCategoriesManager, SystemClock, UbiquityContainer,
};
use core_bookmarks::RecentlyDeletedCategoriesViewModel;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream, LifecycleEvent, SettingsEvent};
use core_sync::{CloudStorageDependencies, CloudStorageManager, CLOUD_SYNCHRONIZATION_ENABLED_KEY};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Aggregated handle to the bridge dependencies the core requires.
///
/// The settings store and the lifecycle observer travel in [`CoreConfig`].
#[derive(Clone)]
pub struct CoreDependencies {
    pub local_monitor: Arc<dyn LocalDirectoryMonitor>,
    pub cloud_monitor: Arc<dyn CloudDirectoryMonitor>,
    pub ubiquity_container: Arc<dyn UbiquityContainer>,
    pub bookmarks_store: Arc<dyn BookmarksStore>,
    pub recently_deleted: Arc<dyn RecentlyDeletedCategoriesManager>,
    pub clock: Arc<dyn Clock>,
    /// Must be the coordinator the container and the bookmarks store use.
    pub file_coordinator: FileCoordinator,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        local_monitor: Arc<dyn LocalDirectoryMonitor>,
        cloud_monitor: Arc<dyn CloudDirectoryMonitor>,
        ubiquity_container: Arc<dyn UbiquityContainer>,
        bookmarks_store: Arc<dyn BookmarksStore>,
        recently_deleted: Arc<dyn RecentlyDeletedCategoriesManager>,
    ) -> Self {
        Self {
            local_monitor,
            cloud_monitor,
            ubiquity_container,
            bookmarks_store,
            recently_deleted,
            clock: Arc::new(SystemClock),
            file_coordinator: FileCoordinator::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_file_coordinator(mut self, coordinator: FileCoordinator) -> Self {
        self.file_coordinator = coordinator;
        self
    }
}

struct LifecycleForwarder {
    cancellation_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    config: CoreConfig,
    event_bus: EventBus,
    cloud_storage: CloudStorageManager,
    recently_deleted: Arc<dyn RecentlyDeletedCategoriesManager>,
    lifecycle: Mutex<Option<LifecycleForwarder>>,
}

impl CoreService {
    /// Create a new service from a validated configuration and bridges.
    pub async fn new(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        let event_bus = EventBus::new(config.event_buffer_size);
        let cloud_storage = CloudStorageManager::new(CloudStorageDependencies {
            local_monitor: deps.local_monitor,
            cloud_monitor: deps.cloud_monitor,
            ubiquity_container: deps.ubiquity_container,
            settings_store: Arc::clone(&config.settings_store),
            bookmarks_store: deps.bookmarks_store,
            event_bus: event_bus.clone(),
            clock: deps.clock,
            device_name: config.device_name.clone(),
            file_coordinator: deps.file_coordinator,
        })
        .await?;

        debug!(?config, "Core service created");
        Ok(Self {
            config,
            event_bus,
            cloud_storage,
            recently_deleted: deps.recently_deleted,
            lifecycle: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn cloud_storage(&self) -> &CloudStorageManager {
        &self.cloud_storage
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Subscribe to everything published on the event bus from now on.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Start the cloud storage manager and feed it the host lifecycle.
    ///
    /// The current lifecycle state is published once, so synchronization
    /// starts right away when it is enabled and the app is in the foreground.
    /// Calling it again has no effect.
    pub async fn start(&self) -> Result<()> {
        if self.lock_lifecycle().is_some() {
            debug!("Core service already started");
            return Ok(());
        }

        self.cloud_storage.start();

        let cancellation_token = CancellationToken::new();
        let task = match &self.config.lifecycle_observer {
            Some(observer) => {
                let state = observer.get_state().await?;
                self.publish_lifecycle(state);

                let mut changes = observer.subscribe_changes().await?;
                let event_bus = self.event_bus.clone();
                let cancelled = cancellation_token.clone();
                Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = cancelled.cancelled() => break,
                            change = changes.next() => match change {
                                Some(state) => {
                                    event_bus.emit(CoreEvent::Lifecycle(lifecycle_event(state))).ok();
                                }
                                None => break,
                            },
                        }
                    }
                    debug!("Lifecycle forwarding stopped");
                }))
            }
            None => {
                self.publish_lifecycle(LifecycleState::Foreground);
                None
            }
        };

        *self.lock_lifecycle() = Some(LifecycleForwarder {
            cancellation_token,
            task,
        });
        info!("Core service started");
        Ok(())
    }

    /// Persist the synchronization switch and notify the manager.
    pub async fn set_synchronization_enabled(&self, enabled: bool) -> Result<()> {
        self.config
            .settings_store
            .set_bool(CLOUD_SYNCHRONIZATION_ENABLED_KEY, enabled)
            .await?;
        info!(enabled, "Cloud synchronization setting changed");
        self.event_bus
            .emit(CoreEvent::Settings(SettingsEvent::CloudSynchronizationToggled {
                enabled,
            }))
            .ok();
        Ok(())
    }

    pub async fn is_synchronization_enabled(&self) -> bool {
        self.cloud_storage.is_synchronization_enabled().await
    }

    /// Build the recently-deleted list with its current contents.
    pub async fn recently_deleted_categories(&self) -> Result<RecentlyDeletedCategoriesViewModel> {
        Ok(RecentlyDeletedCategoriesViewModel::new(Arc::clone(&self.recently_deleted)).await?)
    }

    /// Stop forwarding lifecycle changes and shut the manager down.
    pub async fn shutdown(&self) {
        let forwarder = self.lock_lifecycle().take();
        if let Some(forwarder) = forwarder {
            forwarder.cancellation_token.cancel();
            if let Some(task) = forwarder.task {
                if let Err(error) = task.await {
                    warn!(%error, "Lifecycle forwarding ended abnormally");
                }
            }
        }
        self.cloud_storage.shutdown().await;
        info!("Core service shut down");
    }

    fn publish_lifecycle(&self, state: LifecycleState) {
        self.event_bus
            .emit(CoreEvent::Lifecycle(lifecycle_event(state)))
            .ok();
    }

    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Option<LifecycleForwarder>> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lifecycle_event(state: LifecycleState) -> LifecycleEvent {
    if state.is_foreground() {
        LifecycleEvent::EnteredForeground
    } else {
        LifecycleEvent::EnteredBackground
    }
}

/// Convenience bootstrapper for desktop hosts.
///
/// Requires `config.cloud_directory`. Loads the categories already present in
/// the bookmarks directory before returning.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(mut config: CoreConfig) -> Result<CoreService> {
    use bridge_desktop::{
        DesktopCloudDirectoryMonitor, DesktopLifecycleObserver, DesktopLocalDirectoryMonitor,
        DirectoryBookmarksStore, DirectoryUbiquityContainer,
    };

    let cloud_directory = config
        .cloud_directory
        .clone()
        .ok_or_else(|| CoreError::CapabilityMissing {
            capability: "CloudDirectory".to_string(),
            message: "Desktop hosts must configure .cloud_directory() to the synced folder."
                .to_string(),
        })?;
    if config.lifecycle_observer.is_none() {
        config.lifecycle_observer = Some(Arc::new(DesktopLifecycleObserver::new()));
    }

    let coordinator = FileCoordinator::default();
    let bookmarks = Arc::new(
        DirectoryBookmarksStore::new(&config.bookmarks_directory, config.file_type.clone())
            .with_coordinator(coordinator.clone()),
    );
    let loaded = bookmarks.load_all().await?;
    debug!(loaded, "Loaded bookmarks categories");

    let deps = CoreDependencies::new(
        Arc::new(DesktopLocalDirectoryMonitor::new(
            &config.bookmarks_directory,
            config.file_type.clone(),
        )),
        Arc::new(DesktopCloudDirectoryMonitor::new(
            &cloud_directory,
            config.file_type.clone(),
        )),
        Arc::new(
            DirectoryUbiquityContainer::new(&cloud_directory)
                .with_coordinator(coordinator.clone()),
        ),
        bookmarks.clone(),
        bookmarks,
    )
    .with_file_coordinator(coordinator);

    CoreService::new(config, deps).await
}
