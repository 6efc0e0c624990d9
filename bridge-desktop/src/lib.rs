//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! On desktop the cloud container is a folder kept in sync by the user's
//! cloud drive client, so every bridge works on plain directories:
//! - `SettingsStore` using SQLite-backed key-value store
//! - `LocalDirectoryMonitor` / `CloudDirectoryMonitor` using `notify`
//! - `UbiquityContainer` over a folder with `.Trash` and `.Versions`
//! - `BookmarksStore` / `RecentlyDeletedCategoriesManager` over the
//!   bookmarks directory
//! - `LifecycleObserver` as no-op (desktop always foreground)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopCloudDirectoryMonitor, DirectoryUbiquityContainer};
//! use bridge_traits::FileType;
//!
//! let cloud = "/home/anna/CloudDrive/Maps/bookmarks";
//! let monitor = DesktopCloudDirectoryMonitor::new(cloud, FileType::default());
//! let container = DirectoryUbiquityContainer::new(cloud);
//! ```

mod background;
mod bookmarks;
mod device;
mod monitor;
mod settings;
mod ubiquity;

pub use background::DesktopLifecycleObserver;
pub use bookmarks::{DirectoryBookmarksStore, LoadedCategory};
pub use device::{device_name, DEFAULT_DEVICE_NAME};
pub use monitor::{DesktopCloudDirectoryMonitor, DesktopLocalDirectoryMonitor, DEFAULT_DEBOUNCE};
pub use settings::SqliteSettingsStore;
pub use ubiquity::{
    DirectoryUbiquityContainer, RESOLVED_DIRECTORY_NAME, TRASH_DIRECTORY_NAME,
    VERSIONS_DIRECTORY_NAME,
};
