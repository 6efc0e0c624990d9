//! # Event Bus System
//!
//! Typed, broadcast-based notifications shared by the host shell and the
//! synchronization core, built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The host publishes lifecycle and settings events; the cloud storage manager
//! listens to them to start, pause and stop synchronization, and publishes its
//! own [`SyncEvent`]s in return.
//!
//! ```text
//! ┌─────────────┐  Lifecycle / Settings  ┌───────────┐      subscribe     ┌──────────────┐
//! │ Host shell  ├───────────────────────>│           ├───────────────────>│ CloudStorage │
//! └─────────────┘                        │ EventBus  │                    │   Manager    │
//!                                        │ (broadcast│<───────────────────┤              │
//! ┌─────────────┐      subscribe         │  channel) │     Sync events    └──────────────┘
//! │   UI / logs │<───────────────────────┤           │
//! └─────────────┘                        └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SettingsEvent};
//!
//! let event_bus = EventBus::new(100);
//! let _subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Settings(SettingsEvent::CloudSynchronizationToggled {
//!         enabled: true,
//!     }))
//!     .ok();
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal.
//! - **`RecvError::Closed`**: all senders were dropped. Treat as shutdown.

use bridge_traits::SynchronizationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published and received through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Application lifecycle transitions
    Lifecycle(LifecycleEvent),
    /// User setting changes
    Settings(SettingsEvent),
    /// Synchronization engine state
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Lifecycle(e) => e.description(),
            CoreEvent::Settings(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::ErrorChanged { fatal: true, .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::ErrorChanged { error: Some(_), .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::Started)
            | CoreEvent::Sync(SyncEvent::Stopped)
            | CoreEvent::Sync(SyncEvent::InitialSynchronizationFinished) => EventSeverity::Info,
            CoreEvent::Settings(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Lifecycle Events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LifecycleEvent {
    /// The app became active.
    EnteredForeground,
    /// The app moved to the background.
    EnteredBackground,
}

impl LifecycleEvent {
    fn description(&self) -> &str {
        match self {
            LifecycleEvent::EnteredForeground => "App entered foreground",
            LifecycleEvent::EnteredBackground => "App entered background",
        }
    }
}

// ============================================================================
// Settings Events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SettingsEvent {
    /// The cloud synchronization setting changed to `enabled`.
    CloudSynchronizationToggled { enabled: bool },
}

impl SettingsEvent {
    fn description(&self) -> &str {
        match self {
            SettingsEvent::CloudSynchronizationToggled { enabled: true } => {
                "Cloud synchronization enabled"
            }
            SettingsEvent::CloudSynchronizationToggled { enabled: false } => {
                "Cloud synchronization disabled"
            }
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events published by the cloud storage manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Both monitors started and a file writer was created.
    Started,
    Paused,
    Resumed,
    /// Monitors stopped and the file writer was discarded.
    Stopped,
    /// Categories were reloaded from the local directory.
    CategoriesReloaded { count: usize },
    /// Categories were deleted after their files disappeared from the cloud.
    CategoriesDeleted { count: usize },
    /// This device finished its first synchronization.
    InitialSynchronizationFinished,
    /// The current synchronization error changed.
    ErrorChanged {
        error: Option<SynchronizationError>,
        fatal: bool,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started => "Synchronization started",
            SyncEvent::Paused => "Synchronization paused",
            SyncEvent::Resumed => "Synchronization resumed",
            SyncEvent::Stopped => "Synchronization stopped",
            SyncEvent::CategoriesReloaded { .. } => "Categories reloaded",
            SyncEvent::CategoriesDeleted { .. } => "Categories deleted",
            SyncEvent::InitialSynchronizationFinished => "Initial synchronization finished",
            SyncEvent::ErrorChanged { error: None, .. } => "Synchronization error cleared",
            SyncEvent::ErrorChanged { .. } => "Synchronization error",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers falling behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let sync_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned from `recv`/`try_recv`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns `None` if no matching event is currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn toggled(enabled: bool) -> CoreEvent {
        CoreEvent::Settings(SettingsEvent::CloudSynchronizationToggled { enabled })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(toggled(true)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Lifecycle(LifecycleEvent::EnteredBackground);
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream =
            EventStream::new(bus.subscribe()).filter(|event| matches!(event, CoreEvent::Sync(_)));

        bus.emit(toggled(false)).ok();
        bus.emit(CoreEvent::Sync(SyncEvent::Stopped)).ok();

        assert_eq!(stream.recv().await.unwrap(), CoreEvent::Sync(SyncEvent::Stopped));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for count in 0..5 {
            bus.emit(CoreEvent::Sync(SyncEvent::CategoriesReloaded { count }))
                .ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let fatal = CoreEvent::Sync(SyncEvent::ErrorChanged {
            error: Some(SynchronizationError::ContainerNotFound),
            fatal: true,
        });
        assert_eq!(fatal.severity(), EventSeverity::Error);

        let transient = CoreEvent::Sync(SyncEvent::ErrorChanged {
            error: Some(SynchronizationError::FileUnavailable),
            fatal: false,
        });
        assert_eq!(transient.severity(), EventSeverity::Warning);

        assert_eq!(
            CoreEvent::Sync(SyncEvent::Started).severity(),
            EventSeverity::Info
        );
        assert_eq!(
            CoreEvent::Lifecycle(LifecycleEvent::EnteredForeground).severity(),
            EventSeverity::Debug
        );
    }

    #[test]
    fn test_event_description() {
        assert_eq!(toggled(true).description(), "Cloud synchronization enabled");
        let cleared = CoreEvent::Sync(SyncEvent::ErrorChanged {
            error: None,
            fatal: false,
        });
        assert_eq!(cleared.description(), "Synchronization error cleared");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Sync(SyncEvent::ErrorChanged {
            error: Some(SynchronizationError::FileNotUploadedDueToQuota),
            fatal: false,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Sync\""));
        assert!(json.contains("\"event\":\"ErrorChanged\""));
        assert!(json.contains("file_not_uploaded_due_to_quota"));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for _ in 0..10 {
                bus1.emit(CoreEvent::Lifecycle(LifecycleEvent::EnteredForeground))
                    .ok();
            }
        });
        let handle2 = tokio::spawn(async move {
            for count in 0..10 {
                bus2.emit(CoreEvent::Sync(SyncEvent::CategoriesDeleted { count }))
                    .ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }
}
