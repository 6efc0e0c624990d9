//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the bookmarks synchronization core
//! and platform-specific implementations. Each trait represents a capability the
//! core requires but that is implemented differently per platform.
//!
//! ## Traits
//!
//! ### Synchronization
//! - [`LocalDirectoryMonitor`](monitor::LocalDirectoryMonitor) - Watches the on-device bookmarks directory
//! - [`CloudDirectoryMonitor`](monitor::CloudDirectoryMonitor) - Watches the cloud container
//! - [`UbiquityContainer`](ubiquity::UbiquityContainer) - Downloads, trash and version history
//!
//! ### Bookmarks
//! - [`BookmarksStore`](bookmarks::BookmarksStore) - Reload/delete categories after file changes
//! - [`RecentlyDeletedCategoriesManager`](bookmarks::RecentlyDeletedCategoriesManager) - Trash and recovery of categories
//!
//! ### Platform Integration
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//! - [`LifecycleObserver`](background::LifecycleObserver) - App foreground/background transitions
//!
//! ### Utilities
//! - [`FileCoordinator`](coordination::FileCoordinator) - Exclusive file leases shared by core and bridges
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In Progress |
//! | iOS      | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Failures that
//! belong to the synchronization taxonomy must be reported as
//! [`BridgeError::Synchronization`] so the core can decide whether the session
//! survives them.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks. Implementations must ensure thread safety.

pub mod background;
pub mod bookmarks;
pub mod coordination;
pub mod error;
pub mod monitor;
pub mod storage;
pub mod time;
pub mod ubiquity;

pub use error::{BridgeError, SynchronizationError};

// Re-export commonly used types
pub use background::{LifecycleChangeStream, LifecycleObserver, LifecycleState};
pub use bookmarks::{BookmarksStore, RecentlyDeletedCategoriesManager};
pub use coordination::{CoordinationLease, FileCoordinator};
pub use monitor::{
    CloudContents, CloudDirectoryMonitor, CloudMetadataItem, DirectoryMonitor, FileType,
    LocalContents, LocalDirectoryMonitor, LocalMetadataItem, MonitorEvent, MonitorEventSink,
    MonitorState,
};
pub use storage::SettingsStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
pub use ubiquity::{FileVersion, UbiquityContainer};
