//! Bookmarks Store
//!
//! The category store the synchronization core reports file changes to, and
//! the recently-deleted area categories go to before being purged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Category store fed by synchronization results.
///
/// The core only calls these from its main context, one call at a time.
#[async_trait]
pub trait BookmarksStore: Send + Sync {
    /// Load or reload the category stored in `path`.
    async fn reload_category(&self, path: &Path) -> Result<()>;

    /// Drop the category stored in `path` and remove the file.
    async fn delete_category(&self, path: &Path) -> Result<()>;
}

/// Access to categories that were deleted but can still be recovered.
#[async_trait]
pub trait RecentlyDeletedCategoriesManager: Send + Sync {
    async fn get_recently_deleted_categories(&self) -> Result<Vec<PathBuf>>;

    /// Permanently delete the given categories.
    async fn delete_recently_deleted_categories(&self, urls: &[PathBuf]) -> Result<()>;

    /// Move the given categories back into the bookmarks directory.
    async fn recover_recently_deleted_categories(&self, urls: &[PathBuf]) -> Result<()>;
}
