//! Events flowing through the synchronization pipeline.
//!
//! [`IncomingEvent`]s are what the monitors observed, [`OutgoingEvent`]s are
//! the file operations the state manager decided on, and [`WritingResult`]s
//! are what the file writer reports back for each of them.

use std::fmt;
use std::path::PathBuf;

use bridge_traits::{
    CloudContents, CloudMetadataItem, LocalContents, LocalMetadataItem, SynchronizationError,
};

use crate::error::SyncError;

/// A directory snapshot reported by one of the monitors.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingEvent {
    DidFinishGatheringLocalContents(LocalContents),
    DidFinishGatheringCloudContents(CloudContents),
    DidUpdateLocalContents(LocalContents),
    DidUpdateCloudContents(CloudContents),
}

/// One file operation decided by the state manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingEvent {
    CreateLocalItem(CloudMetadataItem),
    UpdateLocalItem(CloudMetadataItem),
    RemoveLocalItem(CloudMetadataItem),
    StartDownloading(CloudMetadataItem),
    CreateCloudItem(LocalMetadataItem),
    UpdateCloudItem(LocalMetadataItem),
    RemoveCloudItem(LocalMetadataItem),
    ResolveVersionsConflict(CloudMetadataItem),
    ResolveInitialSynchronizationConflict(LocalMetadataItem),
    DidFinishInitialSynchronization,
    DidReceiveError(SynchronizationError),
}

impl OutgoingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateLocalItem(_) => "create_local_item",
            Self::UpdateLocalItem(_) => "update_local_item",
            Self::RemoveLocalItem(_) => "remove_local_item",
            Self::StartDownloading(_) => "start_downloading",
            Self::CreateCloudItem(_) => "create_cloud_item",
            Self::UpdateCloudItem(_) => "update_cloud_item",
            Self::RemoveCloudItem(_) => "remove_cloud_item",
            Self::ResolveVersionsConflict(_) => "resolve_versions_conflict",
            Self::ResolveInitialSynchronizationConflict(_) => {
                "resolve_initial_synchronization_conflict"
            }
            Self::DidFinishInitialSynchronization => "did_finish_initial_synchronization",
            Self::DidReceiveError(_) => "did_receive_error",
        }
    }

    /// Name of the file the operation is about, if any.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::CreateLocalItem(item)
            | Self::UpdateLocalItem(item)
            | Self::RemoveLocalItem(item)
            | Self::StartDownloading(item)
            | Self::ResolveVersionsConflict(item) => Some(&item.file_name),
            Self::CreateCloudItem(item)
            | Self::UpdateCloudItem(item)
            | Self::RemoveCloudItem(item)
            | Self::ResolveInitialSynchronizationConflict(item) => Some(&item.file_name),
            Self::DidFinishInitialSynchronization | Self::DidReceiveError(_) => None,
        }
    }
}

impl fmt::Display for OutgoingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.file_name()) {
            (Self::DidReceiveError(error), _) => write!(f, "{}({})", self.name(), error),
            (_, Some(file_name)) => write!(f, "{}({})", self.name(), file_name),
            (_, None) => f.write_str(self.name()),
        }
    }
}

/// Outcome of one [`OutgoingEvent`] executed by the file writer.
///
/// The writer never touches the bookmarks store; categories to reload or
/// delete are reported here and applied by the manager.
#[derive(Debug)]
pub enum WritingResult {
    Success,
    ReloadCategoriesAtUrls(Vec<PathBuf>),
    DeleteCategoriesAtUrls(Vec<PathBuf>),
    Failure(SyncError),
}

impl WritingResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}
