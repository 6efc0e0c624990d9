//! Plain-directory cloud container.
//!
//! Desktop hosts expose the cloud drive as an ordinary folder kept in sync by
//! a third-party client. The container operations map onto that folder:
//!
//! ```text
//! <container>/
//!   Trip.kml
//!   .Trash/Trip.kml              trashed items
//!   .Versions/Trip.kml/<id>.kml  conflicting versions of Trip.kml
//!   .Versions/Trip.kml/resolved/ versions the user already settled
//! ```

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    FileCoordinator, FileVersion, SynchronizationError, UbiquityContainer,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

pub const TRASH_DIRECTORY_NAME: &str = ".Trash";
pub const VERSIONS_DIRECTORY_NAME: &str = ".Versions";
pub const RESOLVED_DIRECTORY_NAME: &str = "resolved";

const CURRENT_VERSION_ID: &str = "current";

/// [`UbiquityContainer`] over a plain directory.
///
/// Only [`UbiquityContainer::trash_item`] takes a lease of its own; version
/// operations run inside the caller's lease.
pub struct DirectoryUbiquityContainer {
    root: PathBuf,
    coordinator: FileCoordinator,
}

impl DirectoryUbiquityContainer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            coordinator: FileCoordinator::default(),
        }
    }

    pub fn with_coordinator(mut self, coordinator: FileCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn versions_directory(&self, url: &Path) -> Result<PathBuf> {
        Ok(versions_directory(&self.root, &file_name(url)?))
    }
}

/// Folder holding the conflicting versions of `file_name`.
pub fn versions_directory(root: &Path, file_name: &str) -> PathBuf {
    root.join(VERSIONS_DIRECTORY_NAME).join(file_name)
}

/// Unresolved versions stored in `directory`, oldest name first.
///
/// A missing directory means no conflicts.
pub async fn list_versions(directory: &Path) -> io::Result<Vec<FileVersion>> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut versions = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !metadata.is_file() || name.starts_with('.') {
            continue;
        }
        versions.push(FileVersion {
            id: name,
            url: entry.path(),
            modification_date: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    versions.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(versions)
}

fn file_name(url: &Path) -> Result<String> {
    url.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| BridgeError::OperationFailed(format!("Not a file path: {}", url.display())))
}

/// First free `<stem> N.<ext>` in `directory`, starting with the plain name.
async fn unique_destination(directory: &Path, name: &str) -> io::Result<PathBuf> {
    let candidate = directory.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 2;
    loop {
        let candidate = directory.join(format!("{} {}{}", stem, counter, extension));
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

#[async_trait]
impl UbiquityContainer for DirectoryUbiquityContainer {
    async fn start_downloading(&self, url: &Path) -> Result<()> {
        // Files in a plain folder are always local.
        if tokio::fs::try_exists(url).await? {
            Ok(())
        } else {
            Err(SynchronizationError::FileUnavailable.into())
        }
    }

    async fn trash_item(&self, url: &Path) -> Result<PathBuf> {
        let trash = self.root.join(TRASH_DIRECTORY_NAME);
        let name = file_name(url)?;
        let _lease = self
            .coordinator
            .coordinate(&[url.to_path_buf(), trash.join(&name)])
            .await?;
        tokio::fs::create_dir_all(&trash).await?;

        let destination = unique_destination(&trash, &name).await?;
        tokio::fs::rename(url, &destination).await?;
        info!(item = ?url, trashed = ?destination, "Moved item to trash");
        Ok(destination)
    }

    async fn current_version(&self, url: &Path) -> Result<Option<FileVersion>> {
        match tokio::fs::metadata(url).await {
            Ok(metadata) => Ok(Some(FileVersion {
                id: CURRENT_VERSION_ID.to_string(),
                url: url.to_path_buf(),
                modification_date: metadata.modified().ok().map(DateTime::<Utc>::from),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn unresolved_conflict_versions(&self, url: &Path) -> Result<Vec<FileVersion>> {
        Ok(list_versions(&self.versions_directory(url)?).await?)
    }

    async fn replace_item_with_version(
        &self,
        version: &FileVersion,
        destination: &Path,
    ) -> Result<()> {
        if version.url == destination {
            return Ok(());
        }
        tokio::fs::copy(&version.url, destination).await?;
        debug!(version = %version.id, ?destination, "Replaced item with version");
        Ok(())
    }

    async fn mark_versions_resolved(&self, url: &Path, versions: &[FileVersion]) -> Result<()> {
        let resolved = self.versions_directory(url)?.join(RESOLVED_DIRECTORY_NAME);
        tokio::fs::create_dir_all(&resolved).await?;

        for version in versions.iter().filter(|v| v.id != CURRENT_VERSION_ID) {
            let destination = unique_destination(&resolved, &version.id).await?;
            match tokio::fs::rename(&version.url, &destination).await {
                Ok(()) => {}
                // Already settled by another pass.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(item = ?url, count = versions.len(), "Marked versions resolved");
        Ok(())
    }

    async fn remove_other_versions(&self, url: &Path) -> Result<()> {
        let directory = self.versions_directory(url)?;
        match tokio::fs::remove_dir_all(&directory).await {
            Ok(()) => {
                debug!(item = ?url, "Removed stored versions");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
