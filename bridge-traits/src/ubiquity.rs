//! Cloud Container Abstractions
//!
//! Operations on the cloud-backed directory that go beyond plain file I/O:
//! on-demand downloads, soft deletion, and the version history used to settle
//! conflicting edits from several devices.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// One stored version of a file in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    /// Stable identifier, unique per file.
    pub id: String,
    /// Location of this version's content.
    pub url: PathBuf,
    pub modification_date: Option<DateTime<Utc>>,
}

/// Cloud container operations.
///
/// # Platform Notes
///
/// - **iOS/macOS**: ubiquity container plus file version APIs
/// - **Desktop**: a plain directory with `.Trash` and `.Versions` folders
///
/// The version operations are called while the caller holds a
/// [`FileCoordinator`](crate::FileCoordinator) lease on the item, so they must
/// not ask for one themselves.
#[async_trait]
pub trait UbiquityContainer: Send + Sync {
    /// Ask the container to materialize the item locally.
    ///
    /// Returns once the request is accepted; completion is observed through
    /// the cloud monitor.
    async fn start_downloading(&self, url: &Path) -> Result<()>;

    /// Move the item to the container's trash. Returns the trashed location.
    async fn trash_item(&self, url: &Path) -> Result<PathBuf>;

    /// Whether the trash can be listed and cleaned up by name.
    fn supports_trash_enumeration(&self) -> bool {
        true
    }

    /// The version currently visible at `url`, if the item exists.
    async fn current_version(&self, url: &Path) -> Result<Option<FileVersion>>;

    /// Versions that conflict with the current one and were not yet resolved.
    async fn unresolved_conflict_versions(&self, url: &Path) -> Result<Vec<FileVersion>>;

    /// Write the content of `version` to `destination`.
    async fn replace_item_with_version(&self, version: &FileVersion, destination: &Path)
        -> Result<()>;

    /// Flag the given conflict versions of `url` as resolved.
    async fn mark_versions_resolved(&self, url: &Path, versions: &[FileVersion]) -> Result<()>;

    /// Drop every stored version of `url` except the current one.
    async fn remove_other_versions(&self, url: &Path) -> Result<()>;
}
