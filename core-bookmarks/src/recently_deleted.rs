//! # Recently Deleted Categories
//!
//! Headless model behind the "Recently Deleted" screen.
//!
//! ## Overview
//!
//! Categories removed by the user (or by synchronization) are kept in a trash
//! folder by the bookmarks store. This model lists them in a single section
//! and lets the user search, select, recover or permanently delete them. All
//! persistent changes go through a [`RecentlyDeletedCategoriesManager`].
//!
//! ## States
//!
//! ```text
//!            start_selecting            select_category
//!   Normal ─────────────────> Editing ────────────────> Editing
//!     ^ │                  (none selected) <──────────── (some selected)
//!     │ │ start_searching                deselect last
//!     │ v
//!   Searching
//! ```
//!
//! `cancel_selecting`, `cancel_searching`, and every delete or recover
//! operation return to `Normal`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bridge_traits::RecentlyDeletedCategoriesManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BookmarksError, Result};

/// Position of a row in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecentlyDeletedState {
    Normal,
    Searching,
    EditingAndNothingSelected,
    EditingAndSomeSelected,
}

/// One trashed category file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentlyDeletedCategory {
    /// File name without extension.
    pub file_name: String,
    pub file_url: PathBuf,
    pub deletion_date: Option<DateTime<Utc>>,
}

impl RecentlyDeletedCategory {
    pub fn new(file_url: impl Into<PathBuf>, deletion_date: Option<DateTime<Utc>>) -> Self {
        let file_url = file_url.into();
        let file_name = file_url
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            file_name,
            file_url,
            deletion_date,
        }
    }

    /// Build the entry for `file_url`, using the file's modification date as
    /// the deletion date. Trashed files are stamped when they are deleted.
    pub async fn load(file_url: PathBuf) -> Self {
        let deletion_date = tokio::fs::metadata(&file_url)
            .await
            .and_then(|metadata| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        Self::new(file_url, deletion_date)
    }

    fn matches(&self, search_text: &str) -> bool {
        search_text.is_empty()
            || self
                .file_name
                .to_lowercase()
                .contains(&search_text.to_lowercase())
    }
}

/// A list section. The model always uses exactly one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    pub categories: Vec<RecentlyDeletedCategory>,
}

type StateCallback = Box<dyn Fn(RecentlyDeletedState) + Send + Sync>;
type DataSourceCallback = Box<dyn Fn(&[Section]) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Removal {
    Delete,
    Recover,
}

pub struct RecentlyDeletedCategoriesViewModel {
    manager: Arc<dyn RecentlyDeletedCategoriesManager>,
    data_source: Vec<Section>,
    filtered_data_source: Vec<Section>,
    state: RecentlyDeletedState,
    selected_index_paths: Vec<IndexPath>,
    search_text: String,
    on_state_change: Option<StateCallback>,
    on_filtered_data_source_change: Option<DataSourceCallback>,
}

impl fmt::Debug for RecentlyDeletedCategoriesViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecentlyDeletedCategoriesViewModel")
            .field("state", &self.state)
            .field("categories", &self.data_source.iter().map(|s| s.categories.len()).sum::<usize>())
            .field("selected", &self.selected_index_paths.len())
            .field("search_text", &self.search_text)
            .finish()
    }
}

impl RecentlyDeletedCategoriesViewModel {
    /// Create the model and fetch the current list.
    pub async fn new(manager: Arc<dyn RecentlyDeletedCategoriesManager>) -> Result<Self> {
        let mut model = Self {
            manager,
            data_source: Vec::new(),
            filtered_data_source: Vec::new(),
            state: RecentlyDeletedState::Normal,
            selected_index_paths: Vec::new(),
            search_text: String::new(),
            on_state_change: None,
            on_filtered_data_source_change: None,
        };
        model.fetch_recently_deleted_categories().await?;
        Ok(model)
    }

    pub fn state(&self) -> RecentlyDeletedState {
        self.state
    }

    pub fn filtered_data_source(&self) -> &[Section] {
        &self.filtered_data_source
    }

    /// Rows currently visible, across sections.
    pub fn filtered_categories(&self) -> Vec<&RecentlyDeletedCategory> {
        self.filtered_data_source
            .iter()
            .flat_map(|section| section.categories.iter())
            .collect()
    }

    pub fn selected_index_paths(&self) -> &[IndexPath] {
        &self.selected_index_paths
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn set_on_state_change<F>(&mut self, callback: F)
    where
        F: Fn(RecentlyDeletedState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(callback));
    }

    pub fn set_on_filtered_data_source_change<F>(&mut self, callback: F)
    where
        F: Fn(&[Section]) + Send + Sync + 'static,
    {
        self.on_filtered_data_source_change = Some(Box::new(callback));
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    pub async fn fetch_recently_deleted_categories(&mut self) -> Result<()> {
        let urls = self.manager.get_recently_deleted_categories().await?;
        let mut categories = Vec::with_capacity(urls.len());
        for url in urls {
            categories.push(RecentlyDeletedCategory::load(url).await);
        }
        debug!(count = categories.len(), "Fetched recently deleted categories");

        self.data_source = vec![Section { categories }];
        self.update_filtered_data_source();
        Ok(())
    }

    // ========================================================================
    // Deleting and recovering
    // ========================================================================

    pub async fn delete_category(&mut self, index_path: IndexPath) -> Result<()> {
        self.remove_categories(&[index_path], Removal::Delete).await
    }

    pub async fn recover_category(&mut self, index_path: IndexPath) -> Result<()> {
        self.remove_categories(&[index_path], Removal::Recover).await
    }

    /// Delete the selected rows, or every row when nothing is selected.
    pub async fn delete_selected_categories(&mut self) -> Result<()> {
        self.remove_selected_categories(Removal::Delete).await
    }

    /// Recover the selected rows, or every row when nothing is selected.
    pub async fn recover_selected_categories(&mut self) -> Result<()> {
        self.remove_selected_categories(Removal::Recover).await
    }

    async fn remove_selected_categories(&mut self, removal: Removal) -> Result<()> {
        let total: usize = self
            .data_source
            .iter()
            .map(|section| section.categories.len())
            .sum();
        let remove_all =
            self.selected_index_paths.is_empty() || self.selected_index_paths.len() == total;
        let index_paths = if remove_all {
            Vec::new()
        } else {
            self.selected_index_paths.clone()
        };

        self.remove_categories(&index_paths, removal).await?;
        self.selected_index_paths.clear();
        self.update_state(RecentlyDeletedState::Normal);
        Ok(())
    }

    /// An empty `index_paths` means every category.
    async fn remove_categories(&mut self, index_paths: &[IndexPath], removal: Removal) -> Result<()> {
        let urls: Vec<PathBuf> = if index_paths.is_empty() {
            self.data_source
                .iter()
                .flat_map(|section| section.categories.iter())
                .map(|category| category.file_url.clone())
                .collect()
        } else {
            index_paths
                .iter()
                .map(|index_path| {
                    self.filtered_category(*index_path)
                        .map(|category| category.file_url.clone())
                })
                .collect::<Result<_>>()?
        };

        if !urls.is_empty() {
            match removal {
                Removal::Delete => self.manager.delete_recently_deleted_categories(&urls).await?,
                Removal::Recover => {
                    self.manager.recover_recently_deleted_categories(&urls).await?
                }
            }
            info!(count = urls.len(), ?removal, "Removed recently deleted categories");
        }

        if index_paths.is_empty() {
            self.data_source.clear();
        } else {
            for section in &mut self.data_source {
                section
                    .categories
                    .retain(|category| !urls.contains(&category.file_url));
            }
        }

        self.update_filtered_data_source();
        self.update_state(RecentlyDeletedState::Normal);
        Ok(())
    }

    fn filtered_category(&self, index_path: IndexPath) -> Result<&RecentlyDeletedCategory> {
        self.filtered_data_source
            .get(index_path.section)
            .and_then(|section| section.categories.get(index_path.row))
            .ok_or(BookmarksError::InvalidIndexPath(index_path))
    }

    // ========================================================================
    // Selection
    // ========================================================================

    pub fn start_selecting(&mut self) {
        self.update_state(RecentlyDeletedState::EditingAndNothingSelected);
    }

    pub fn select_category(&mut self, index_path: IndexPath) {
        if !self.selected_index_paths.contains(&index_path) {
            self.selected_index_paths.push(index_path);
        }
        self.update_state(RecentlyDeletedState::EditingAndSomeSelected);
    }

    pub fn deselect_category(&mut self, index_path: IndexPath) {
        self.selected_index_paths.retain(|selected| *selected != index_path);
        if self.selected_index_paths.is_empty() {
            self.update_state(RecentlyDeletedState::EditingAndNothingSelected);
        }
    }

    pub fn select_all_categories(&mut self) {
        self.selected_index_paths = self
            .filtered_data_source
            .iter()
            .enumerate()
            .flat_map(|(section, content)| {
                (0..content.categories.len()).map(move |row| IndexPath::new(section, row))
            })
            .collect();
        self.update_state(RecentlyDeletedState::EditingAndSomeSelected);
    }

    pub fn deselect_all_categories(&mut self) {
        self.selected_index_paths.clear();
        self.update_state(RecentlyDeletedState::EditingAndNothingSelected);
    }

    pub fn cancel_selecting(&mut self) {
        self.selected_index_paths.clear();
        self.update_state(RecentlyDeletedState::Normal);
    }

    // ========================================================================
    // Searching
    // ========================================================================

    pub fn start_searching(&mut self) {
        self.update_state(RecentlyDeletedState::Searching);
    }

    /// Filter rows by a case-insensitive match on the file name. An empty
    /// text cancels the search.
    pub fn search(&mut self, search_text: &str) {
        self.update_state(RecentlyDeletedState::Searching);
        if search_text.is_empty() {
            self.cancel_searching();
            return;
        }
        self.search_text = search_text.to_string();
        self.selected_index_paths.clear();
        self.update_filtered_data_source();
    }

    pub fn cancel_searching(&mut self) {
        self.search_text.clear();
        self.selected_index_paths.clear();
        self.update_filtered_data_source();
        self.update_state(RecentlyDeletedState::Normal);
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    fn update_state(&mut self, state: RecentlyDeletedState) {
        if self.state == state {
            return;
        }
        self.state = state;
        if let Some(callback) = &self.on_state_change {
            callback(state);
        }
    }

    fn update_filtered_data_source(&mut self) {
        self.filtered_data_source = self
            .data_source
            .iter()
            .map(|section| Section {
                categories: section
                    .categories
                    .iter()
                    .filter(|category| category.matches(&self.search_text))
                    .cloned()
                    .collect(),
            })
            .collect();
        if let Some(callback) = &self.on_filtered_data_source_change {
            callback(&self.filtered_data_source);
        }
    }
}
