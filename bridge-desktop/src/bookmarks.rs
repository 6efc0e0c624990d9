//! Bookmarks store backed by the bookmarks directory.
//!
//! Deleted categories are moved to `<bookmarks>/.Trash` and stamped with the
//! deletion time, which is what the recently-deleted list shows.
//!
//! Every file access goes through the [`FileCoordinator`] shared with the
//! synchronization file writer, so a category is never read mid-write.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    BookmarksStore, FileCoordinator, FileType, RecentlyDeletedCategoriesManager,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

pub const TRASH_DIRECTORY_NAME: &str = ".Trash";

/// A category file currently loaded in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedCategory {
    pub file_url: PathBuf,
    pub contents: String,
    pub last_modification_date: Option<DateTime<Utc>>,
}

pub struct DirectoryBookmarksStore {
    directory: PathBuf,
    file_type: FileType,
    coordinator: FileCoordinator,
    categories: RwLock<HashMap<PathBuf, LoadedCategory>>,
}

impl DirectoryBookmarksStore {
    pub fn new(directory: impl Into<PathBuf>, file_type: FileType) -> Self {
        Self {
            directory: directory.into(),
            file_type,
            coordinator: FileCoordinator::default(),
            categories: RwLock::new(HashMap::new()),
        }
    }

    /// Share `coordinator` with the other components touching the directory.
    pub fn with_coordinator(mut self, coordinator: FileCoordinator) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn trash_directory(&self) -> PathBuf {
        self.directory.join(TRASH_DIRECTORY_NAME)
    }

    /// Load every category file currently in the bookmarks directory.
    pub async fn load_all(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.is_category_file(&path) && entry.file_type().await?.is_file() {
                self.reload_category(&path).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn category(&self, path: &Path) -> Option<LoadedCategory> {
        self.categories.read().await.get(path).cloned()
    }

    /// Paths of loaded categories, sorted.
    pub async fn loaded_categories(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.categories.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn is_category_file(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        !hidden && self.file_type.matches(path)
    }
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| BridgeError::OperationFailed(format!("Not a file path: {}", path.display())))
}

/// First free name in `directory`, appending ` N` before the extension.
async fn unique_destination(directory: &Path, name: &std::ffi::OsStr) -> io::Result<PathBuf> {
    let candidate = directory.join(name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let path = Path::new(name);
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
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

async fn stamp_now(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now())
    })
    .await
    .map_err(io::Error::other)?
}

#[async_trait]
impl BookmarksStore for DirectoryBookmarksStore {
    async fn reload_category(&self, path: &Path) -> Result<()> {
        let (contents, last_modification_date) = {
            let _lease = self.coordinator.coordinate(&[path]).await?;
            let contents = tokio::fs::read_to_string(path).await?;
            let modified = tokio::fs::metadata(path)
                .await?
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);
            (contents, modified)
        };

        let category = LoadedCategory {
            file_url: path.to_path_buf(),
            contents,
            last_modification_date,
        };
        self.categories
            .write()
            .await
            .insert(path.to_path_buf(), category);
        debug!(?path, "Reloaded category");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_category(&self, path: &Path) -> Result<()> {
        self.categories.write().await.remove(path);

        let trash = self.trash_directory();
        let name = file_name(path)?;
        let _lease = self
            .coordinator
            .coordinate(&[path.to_path_buf(), trash.join(name)])
            .await?;

        if !tokio::fs::try_exists(path).await? {
            debug!("Category file already gone");
            return Ok(());
        }

        tokio::fs::create_dir_all(&trash).await?;
        let destination = unique_destination(&trash, name).await?;
        tokio::fs::rename(path, &destination).await?;
        stamp_now(&destination).await?;

        info!(?destination, "Moved category to recently deleted");
        Ok(())
    }
}

#[async_trait]
impl RecentlyDeletedCategoriesManager for DirectoryBookmarksStore {
    async fn get_recently_deleted_categories(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(self.trash_directory()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut urls = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.is_category_file(&path) && entry.file_type().await?.is_file() {
                urls.push(path);
            }
        }
        urls.sort();
        Ok(urls)
    }

    async fn delete_recently_deleted_categories(&self, urls: &[PathBuf]) -> Result<()> {
        for url in urls {
            let _lease = self.coordinator.coordinate(&[url]).await?;
            match tokio::fs::remove_file(url).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(count = urls.len(), "Permanently deleted categories");
        Ok(())
    }

    async fn recover_recently_deleted_categories(&self, urls: &[PathBuf]) -> Result<()> {
        tokio::fs::create_dir_all(&self.directory).await?;
        for url in urls {
            let name = file_name(url)?;
            let destination = {
                let _lease = self
                    .coordinator
                    .coordinate(&[url.clone(), self.directory.join(name)])
                    .await?;
                let destination = unique_destination(&self.directory, name).await?;
                tokio::fs::rename(url, &destination).await?;
                destination
            };
            self.reload_category(&destination).await?;
            debug!(?destination, "Recovered category");
        }
        info!(count = urls.len(), "Recovered categories");
        Ok(())
    }
}
