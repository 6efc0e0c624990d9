//! # Cloud Synchronization Module
//!
//! Keeps the local bookmarks directory and the cloud container in step.
//!
//! ## Overview
//!
//! Synchronization is split into three stages:
//! - Directory monitors (bridge implementations) report snapshots of both sides
//! - The state manager diffs those snapshots into file operations
//! - The file writer executes the operations one at a time
//!
//! The [`CloudStorageManager`] owns the session, routes events between the
//! stages, applies writing results to the bookmarks store, and reports errors
//! to observers.
//!
//! ## Components
//!
//! - **State Manager** (`state_manager`): Pure diffing of local and cloud snapshots
//! - **File Writer** (`file_writer`): Serialized execution of file operations
//! - **Main Queue** (`dispatch`): Ordered application of results
//! - **Observers** (`observers`): Error observer registry
//! - **Cloud Storage Manager** (`manager`): Session orchestration

pub mod dispatch;
pub mod error;
pub mod events;
pub mod file_writer;
pub mod manager;
pub mod observers;
pub mod state_manager;

pub use bridge_traits::{
    CloudContents, CloudMetadataItem, CoordinationLease, FileCoordinator, LocalContents,
    LocalMetadataItem, SynchronizationError,
};
pub use dispatch::MainQueue;
pub use error::{Result, SyncError};
pub use events::{IncomingEvent, OutgoingEvent, WritingResult};
pub use file_writer::{
    generate_new_file_url, FileWriterConfig, SynchronizationFileWriter, WritingCompletion,
};
pub use manager::{
    CloudStorageDependencies, CloudStorageManager, CLOUD_SYNCHRONIZATION_ENABLED_KEY,
    DID_FINISH_INITIAL_CLOUD_SYNCHRONIZATION_KEY,
};
pub use observers::{ErrorObserver, ObserverRegistry, ObserverToken};
pub use state_manager::{DefaultSynchronizationStateManager, SynchronizationStateManager};
