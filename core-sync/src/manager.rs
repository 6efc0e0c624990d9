//! # Cloud Storage Manager
//!
//! Orchestrates a synchronization session between the local bookmarks
//! directory and the cloud container.
//!
//! ## Overview
//!
//! The manager wires the pieces together:
//!
//! - both directory monitors report into one router task
//! - monitor events go through the [`SynchronizationStateManager`]
//! - the resulting intents are executed by a [`SynchronizationFileWriter`]
//! - writing results are applied on the [`MainQueue`]: categories are
//!   reloaded or deleted in the bookmarks store, errors are recorded and
//!   broadcast to observers
//!
//! Lifecycle and settings events arriving on the [`EventBus`] drive the
//! session:
//!
//! | Event | Setting enabled | Action |
//! |-------|-----------------|--------|
//! | Entered foreground | yes | start or resume |
//! | Entered background | yes | pause |
//! | Synchronization toggled on | - | start when in the foreground |
//! | Synchronization toggled off | - | full stop |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{CloudStorageDependencies, CloudStorageManager};
//!
//! let manager = CloudStorageManager::new(dependencies).await?;
//! manager.start();
//!
//! let token = manager.add_observer(Arc::new(|error| {
//!     if let Some(error) = error {
//!         tracing::warn!(%error, "synchronization problem");
//!     }
//! }));
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bridge_traits::{
    BookmarksStore, Clock, CloudDirectoryMonitor, FileCoordinator, LocalDirectoryMonitor,
    MonitorEvent, MonitorState, SettingsStore, SynchronizationError, UbiquityContainer,
};
use core_runtime::events::{CoreEvent, EventBus, LifecycleEvent, SettingsEvent, SyncEvent};
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatch::MainQueue;
use crate::error::{Result, SyncError};
use crate::events::{IncomingEvent, OutgoingEvent, WritingResult};
use crate::file_writer::{FileWriterConfig, SynchronizationFileWriter};
use crate::observers::{ErrorObserver, ObserverRegistry, ObserverToken};
use crate::state_manager::{DefaultSynchronizationStateManager, SynchronizationStateManager};

/// Settings key of the user-facing synchronization switch.
pub const CLOUD_SYNCHRONIZATION_ENABLED_KEY: &str = "cloud_synchronization_enabled";

/// Settings key recording that this device finished its first synchronization.
pub const DID_FINISH_INITIAL_CLOUD_SYNCHRONIZATION_KEY: &str =
    "did_finish_initial_cloud_synchronization";

/// Collaborators of a [`CloudStorageManager`].
#[derive(Clone)]
pub struct CloudStorageDependencies {
    pub local_monitor: Arc<dyn LocalDirectoryMonitor>,
    pub cloud_monitor: Arc<dyn CloudDirectoryMonitor>,
    pub ubiquity_container: Arc<dyn UbiquityContainer>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub bookmarks_store: Arc<dyn BookmarksStore>,
    pub event_bus: EventBus,
    pub clock: Arc<dyn Clock>,
    /// Used in the names of initial-synchronization conflict copies.
    pub device_name: String,
    /// Shared with every bridge that touches the synchronized directories.
    pub file_coordinator: FileCoordinator,
}

enum WriterSlot {
    Inactive,
    Active {
        writer: Arc<SynchronizationFileWriter>,
        session: u64,
    },
}

struct SessionState {
    writer: WriterSlot,
    state_manager: Box<dyn SynchronizationStateManager>,
    next_session: u64,
}

impl SessionState {
    fn active_session(&self) -> Option<u64> {
        match &self.writer {
            WriterSlot::Active { session, .. } => Some(*session),
            WriterSlot::Inactive => None,
        }
    }
}

struct RouterHandle {
    cancellation_token: CancellationToken,
    task: JoinHandle<()>,
}

struct ManagerInner {
    local_monitor: Arc<dyn LocalDirectoryMonitor>,
    cloud_monitor: Arc<dyn CloudDirectoryMonitor>,
    ubiquity_container: Arc<dyn UbiquityContainer>,
    settings_store: Arc<dyn SettingsStore>,
    bookmarks_store: Arc<dyn BookmarksStore>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    device_name: String,
    coordinator: FileCoordinator,
    session: AsyncMutex<SessionState>,
    error: Mutex<Option<SynchronizationError>>,
    observers: ObserverRegistry,
    main_queue: MainQueue,
    is_foreground: AtomicBool,
    router: Mutex<Option<RouterHandle>>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let router = self
            .router
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(router) = router {
            router.cancellation_token.cancel();
        }
    }
}

/// Orchestrator of cloud synchronization.
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct CloudStorageManager {
    inner: Arc<ManagerInner>,
}

impl CloudStorageManager {
    /// Create a manager, reading the initial-synchronization flag from settings.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn new(dependencies: CloudStorageDependencies) -> Result<Self> {
        let did_finish_initial_synchronization = dependencies
            .settings_store
            .get_bool(DID_FINISH_INITIAL_CLOUD_SYNCHRONIZATION_KEY)
            .await?
            .unwrap_or(false);

        debug!(
            initial = !did_finish_initial_synchronization,
            "Creating cloud storage manager"
        );

        Ok(Self::with_state_manager(
            dependencies,
            Box::new(DefaultSynchronizationStateManager::new(
                !did_finish_initial_synchronization,
            )),
        ))
    }

    /// Create a manager around a custom state manager.
    pub fn with_state_manager(
        dependencies: CloudStorageDependencies,
        state_manager: Box<dyn SynchronizationStateManager>,
    ) -> Self {
        let inner = ManagerInner {
            local_monitor: dependencies.local_monitor,
            cloud_monitor: dependencies.cloud_monitor,
            ubiquity_container: dependencies.ubiquity_container,
            settings_store: dependencies.settings_store,
            bookmarks_store: dependencies.bookmarks_store,
            event_bus: dependencies.event_bus,
            clock: dependencies.clock,
            device_name: dependencies.device_name,
            coordinator: dependencies.file_coordinator,
            session: AsyncMutex::new(SessionState {
                writer: WriterSlot::Inactive,
                state_manager,
                next_session: 0,
            }),
            error: Mutex::new(None),
            observers: ObserverRegistry::new(),
            main_queue: MainQueue::new(),
            is_foreground: AtomicBool::new(true),
            router: Mutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    fn from_inner(inner: Arc<ManagerInner>) -> Self {
        Self { inner }
    }

    // ========================================================================
    // Wiring
    // ========================================================================

    /// Install the monitor sinks and start listening to the event bus.
    ///
    /// Calling it again has no effect. Synchronization itself starts once the
    /// setting is enabled and the app is in the foreground.
    pub fn start(&self) {
        let mut router = self
            .inner
            .router
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if router.is_some() {
            debug!("Cloud storage manager already started");
            return;
        }

        let (sink, mut monitor_events) = mpsc::unbounded_channel();
        self.inner.local_monitor.set_event_sink(sink.clone());
        self.inner.cloud_monitor.set_event_sink(sink);
        let mut bus_events = self.inner.event_bus.subscribe();

        let cancellation_token = CancellationToken::new();
        let cancelled = cancellation_token.clone();
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    Some(event) = monitor_events.recv() => {
                        let Some(inner) = weak.upgrade() else { break };
                        Self::from_inner(inner).handle_monitor_event(event).await;
                    }
                    received = bus_events.recv() => match received {
                        Ok(event) => {
                            let Some(inner) = weak.upgrade() else { break };
                            Self::from_inner(inner).handle_core_event(event).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Cloud storage manager lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("Cloud storage router stopped");
        });

        *router = Some(RouterHandle {
            cancellation_token,
            task,
        });
        info!("Cloud storage manager started");
    }

    async fn handle_core_event(&self, event: CoreEvent) {
        match event {
            CoreEvent::Lifecycle(LifecycleEvent::EnteredForeground) => {
                self.inner.is_foreground.store(true, Ordering::SeqCst);
                if self.is_synchronization_enabled().await {
                    self.start_synchronization().await;
                }
            }
            CoreEvent::Lifecycle(LifecycleEvent::EnteredBackground) => {
                self.inner.is_foreground.store(false, Ordering::SeqCst);
                if self.is_synchronization_enabled().await {
                    self.pause_synchronization().await;
                }
            }
            CoreEvent::Settings(SettingsEvent::CloudSynchronizationToggled { enabled: true }) => {
                if self.inner.is_foreground.load(Ordering::SeqCst) {
                    self.start_synchronization().await;
                } else {
                    debug!("Synchronization enabled in the background, waiting for foreground");
                }
            }
            CoreEvent::Settings(SettingsEvent::CloudSynchronizationToggled { enabled: false }) => {
                self.stop_synchronization().await;
            }
            CoreEvent::Sync(_) => {}
        }
    }

    /// Current value of the synchronization switch; disabled when unreadable.
    pub async fn is_synchronization_enabled(&self) -> bool {
        match self
            .inner
            .settings_store
            .get_bool(CLOUD_SYNCHRONIZATION_ENABLED_KEY)
            .await
        {
            Ok(enabled) => enabled.unwrap_or(false),
            Err(error) => {
                warn!(%error, "Failed to read synchronization setting");
                false
            }
        }
    }

    // ========================================================================
    // Session transitions
    // ========================================================================

    /// Start, or resume, synchronization.
    #[instrument(skip(self))]
    pub async fn start_synchronization(&self) {
        let mut session = self.inner.session.lock().await;

        match self.inner.cloud_monitor.state() {
            MonitorState::Started => {
                debug!("Synchronization already running");
                return;
            }
            MonitorState::Paused => {
                self.inner.local_monitor.resume();
                self.inner.cloud_monitor.resume();
                info!("Synchronization resumed");
                self.emit(SyncEvent::Resumed);
                return;
            }
            MonitorState::Stopped => {}
        }

        match self.start_session(&mut session).await {
            Ok(session_id) => {
                info!(session = session_id, "Synchronization started");
                self.emit(SyncEvent::Started);
            }
            Err(error) => {
                self.stop_locked(&mut session);
                self.record_error(error);
            }
        }
    }

    async fn start_session(&self, session: &mut SessionState) -> Result<u64> {
        let cloud_directory: PathBuf = self.inner.cloud_monitor.start().await?;
        let local_directory: PathBuf = self.inner.local_monitor.start().await?;

        session.next_session += 1;
        let session_id = session.next_session;

        let writer = SynchronizationFileWriter::new(
            FileWriterConfig {
                local_directory,
                cloud_directory,
                device_name: self.inner.device_name.clone(),
            },
            Arc::clone(&self.inner.ubiquity_container),
            self.inner.coordinator.clone(),
            Arc::clone(&self.inner.clock),
        );
        session.writer = WriterSlot::Active {
            writer: Arc::new(writer),
            session: session_id,
        };
        Ok(session_id)
    }

    /// Stop both monitors, discard the writer and forget all state.
    #[instrument(skip(self))]
    pub async fn stop_synchronization(&self) {
        let mut session = self.inner.session.lock().await;
        self.stop_locked(&mut session);
    }

    fn stop_locked(&self, session: &mut SessionState) {
        self.inner.local_monitor.stop();
        self.inner.cloud_monitor.stop();
        session.writer = WriterSlot::Inactive;
        session.state_manager.reset_state();
        self.set_error(None);
        info!("Synchronization stopped");
        self.emit(SyncEvent::Stopped);
    }

    #[instrument(skip(self))]
    pub async fn pause_synchronization(&self) {
        let _session = self.inner.session.lock().await;
        if self.inner.cloud_monitor.state() != MonitorState::Started {
            return;
        }
        self.inner.local_monitor.pause();
        self.inner.cloud_monitor.pause();
        info!("Synchronization paused");
        self.emit(SyncEvent::Paused);
    }

    /// Whether a file writer is currently installed.
    pub async fn is_synchronizing(&self) -> bool {
        self.inner.session.lock().await.active_session().is_some()
    }

    // ========================================================================
    // Event processing
    // ========================================================================

    /// Feed one monitor event through the state manager and dispatch the
    /// resulting intents.
    ///
    /// Events arriving while no session is active are dropped.
    pub async fn handle_monitor_event(&self, event: MonitorEvent) {
        let mut session = self.inner.session.lock().await;
        let (writer, session_id) = match &session.writer {
            WriterSlot::Active { writer, session } => (Arc::clone(writer), *session),
            WriterSlot::Inactive => {
                debug!(event = event.name(), "No active session, dropping monitor event");
                return;
            }
        };

        let incoming = match event {
            MonitorEvent::LocalContentsGathered(contents) => {
                IncomingEvent::DidFinishGatheringLocalContents(contents)
            }
            MonitorEvent::LocalContentsUpdated(contents) => {
                IncomingEvent::DidUpdateLocalContents(contents)
            }
            MonitorEvent::CloudContentsGathered(contents) => {
                IncomingEvent::DidFinishGatheringCloudContents(contents)
            }
            MonitorEvent::CloudContentsUpdated(contents) => {
                IncomingEvent::DidUpdateCloudContents(contents)
            }
            MonitorEvent::LocalMonitorFailed(error) | MonitorEvent::CloudMonitorFailed(error) => {
                self.process_error_locked(&mut session, error.into());
                return;
            }
        };

        let events = session.state_manager.resolve_event(incoming);
        self.process_events(events, &writer, session_id);
    }

    fn process_events(
        &self,
        events: Vec<OutgoingEvent>,
        writer: &SynchronizationFileWriter,
        session_id: u64,
    ) {
        if events.is_empty() {
            self.set_error(None);
            return;
        }

        for event in events {
            debug!(%event, session = session_id, "Dispatching to file writer");
            let intent = event.clone();
            let weak = Arc::downgrade(&self.inner);

            writer.process_event(
                event,
                Box::new(move |result| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let manager = Self::from_inner(inner);
                    let queue_owner = manager.clone();
                    queue_owner.inner.main_queue.post(
                        async move {
                            manager
                                .apply_writing_result(session_id, intent, result)
                                .await;
                        }
                        .boxed(),
                    );
                }),
            );
        }
    }

    /// Runs on the main queue.
    async fn apply_writing_result(
        &self,
        session_id: u64,
        intent: OutgoingEvent,
        result: WritingResult,
    ) {
        let mut session = self.inner.session.lock().await;
        if session.active_session() != Some(session_id) {
            debug!(session = session_id, ?result, "Discarding result of an ended session");
            return;
        }

        match result {
            WritingResult::Success => {
                if matches!(intent, OutgoingEvent::DidFinishInitialSynchronization) {
                    self.finish_initial_synchronization().await;
                }
            }
            WritingResult::ReloadCategoriesAtUrls(urls) => {
                for url in &urls {
                    if let Err(error) = self.inner.bookmarks_store.reload_category(url).await {
                        error!(%error, ?url, "Failed to reload category");
                    }
                }
                self.emit(SyncEvent::CategoriesReloaded { count: urls.len() });
            }
            WritingResult::DeleteCategoriesAtUrls(urls) => {
                let mut deleted = 0;
                for url in &urls {
                    match self.inner.bookmarks_store.delete_category(url).await {
                        Ok(()) => deleted += 1,
                        Err(error) => error!(%error, ?url, "Failed to delete category"),
                    }
                }
                if deleted < urls.len() {
                    session.state_manager.handle_failed_intent(&intent);
                }
                self.emit(SyncEvent::CategoriesDeleted { count: deleted });
            }
            WritingResult::Failure(error) => {
                session.state_manager.handle_failed_intent(&intent);
                self.process_error_locked(&mut session, error);
            }
        }
    }

    async fn finish_initial_synchronization(&self) {
        if let Err(error) = self
            .inner
            .settings_store
            .set_bool(DID_FINISH_INITIAL_CLOUD_SYNCHRONIZATION_KEY, true)
            .await
        {
            error!(%error, "Failed to persist initial synchronization flag");
        }
        info!("Initial synchronization finished");
        self.emit(SyncEvent::InitialSynchronizationFinished);
    }

    // ========================================================================
    // Errors and observers
    // ========================================================================

    fn process_error_locked(&self, session: &mut SessionState, error: SyncError) {
        if error
            .synchronization_error()
            .is_some_and(|error| error.is_fatal())
        {
            self.stop_locked(session);
        }
        self.record_error(error);
    }

    fn record_error(&self, error: SyncError) {
        match error.synchronization_error() {
            Some(synchronization_error) if synchronization_error.is_fatal() => {
                error!(%error, "Synchronization failed");
                self.set_error(Some(synchronization_error));
            }
            Some(synchronization_error) => {
                warn!(%error, "Synchronization problem");
                self.set_error(Some(synchronization_error));
            }
            None => error!(%error, "Synchronization operation failed"),
        }
    }

    /// Store `error` and notify observers on the main queue.
    ///
    /// Errors are always broadcast; clearing is broadcast only when an error
    /// was set.
    fn set_error(&self, error: Option<SynchronizationError>) {
        let previous = {
            let mut current = self
                .inner
                .error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *current, error)
        };
        if error.is_none() && previous.is_none() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        self.inner
            .main_queue
            .post(async move { inner.observers.notify(error) }.boxed());
        self.emit(SyncEvent::ErrorChanged {
            error,
            fatal: error.is_some_and(|error| error.is_fatal()),
        });
    }

    pub fn current_error(&self) -> Option<SynchronizationError> {
        *self
            .inner
            .error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an error observer. It is called right away with the current
    /// error.
    pub fn add_observer(&self, callback: ErrorObserver) -> ObserverToken {
        self.inner.observers.add(self.current_error(), callback)
    }

    /// Register an observer that lives only as long as `owner`.
    pub fn add_bound_observer<T>(&self, owner: &Arc<T>, callback: ErrorObserver) -> ObserverToken
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .observers
            .add_bound(owner, self.current_error(), callback)
    }

    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        self.inner.observers.remove(token)
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Wait for queued file operations and their results to be applied.
    pub async fn wait_until_idle(&self) {
        let writer = {
            let session = self.inner.session.lock().await;
            match &session.writer {
                WriterSlot::Active { writer, .. } => Some(Arc::clone(writer)),
                WriterSlot::Inactive => None,
            }
        };
        if let Some(writer) = writer {
            writer.flush().await;
        }
        // Applied results post their observer notifications behind the first flush.
        self.inner.main_queue.flush().await;
        self.inner.main_queue.flush().await;
    }

    /// Stop synchronizing and detach from the monitors and the event bus.
    pub async fn shutdown(&self) {
        self.stop_synchronization().await;

        let router = self
            .inner
            .router
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(router) = router {
            router.cancellation_token.cancel();
            if let Err(error) = router.task.await {
                warn!(%error, "Cloud storage router ended abnormally");
            }
        }

        self.inner.main_queue.flush().await;
        info!("Cloud storage manager shut down");
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.event_bus.emit(CoreEvent::Sync(event)).ok();
    }
}
