//! # Core Configuration Module
//!
//! Configuration for the bookmarks synchronization core.
//!
//! ## Overview
//!
//! A builder produces a validated [`CoreConfig`] holding the synchronized
//! directories, the file type, the device name used to disambiguate
//! conflict copies, and the bridges the core cannot work without.
//!
//! ## Required Dependencies
//!
//! - `bookmarks_directory` - the local directory that is synchronized
//! - `SettingsStore` - persisted flags (sync enabled, initial sync finished)
//!
//! When the `desktop-shims` feature is enabled a SQLite `SettingsStore` and a
//! host-name based device name are provided automatically.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .bookmarks_directory("/home/anna/.local/share/maps/bookmarks")
//!     .cloud_directory("/home/anna/CloudDrive/Maps/bookmarks")
//!     .device_name("anna-laptop")
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Missing bookmarks directory
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - bookmarks directory is required");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{FileType, LifecycleObserver, SettingsStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Device name used when none is configured and the host cannot provide one.
pub const FALLBACK_DEVICE_NAME: &str = "Device";

/// Core configuration for the bookmarks synchronization core.
#[derive(Clone)]
pub struct CoreConfig {
    /// Local directory holding one file per bookmarks category
    pub bookmarks_directory: PathBuf,

    /// Cloud container directory, when the host exposes it as a plain path
    pub cloud_directory: Option<PathBuf>,

    /// The synchronized file type
    pub file_type: FileType,

    /// Name embedded into conflict copies created by this device
    pub device_name: String,

    /// User preferences storage (required)
    pub settings_store: Arc<dyn SettingsStore>,

    /// App lifecycle observer (optional)
    pub lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("bookmarks_directory", &self.bookmarks_directory)
            .field("cloud_directory", &self.cloud_directory)
            .field("file_type", &self.file_type)
            .field("device_name", &"[REDACTED]")
            .field("settings_store", &"SettingsStore { ... }")
            .field(
                "lifecycle_observer",
                &self
                    .lifecycle_observer
                    .as_ref()
                    .map(|_| "LifecycleObserver { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// Called by [`CoreConfigBuilder::build`]; exposed for configs assembled
    /// by hand.
    pub fn validate(&self) -> Result<()> {
        if self.bookmarks_directory.as_os_str().is_empty() {
            return Err(Error::Config(
                "Bookmarks directory cannot be empty".to_string(),
            ));
        }

        if let Some(cloud_directory) = &self.cloud_directory {
            if cloud_directory.as_os_str().is_empty() {
                return Err(Error::Config("Cloud directory cannot be empty".to_string()));
            }
            if cloud_directory == &self.bookmarks_directory {
                return Err(Error::Config(
                    "Cloud directory must differ from the bookmarks directory".to_string(),
                ));
            }
        }

        let extension = &self.file_type.extension;
        if extension.is_empty() {
            return Err(Error::Config("File extension cannot be empty".to_string()));
        }
        if extension.contains('.') {
            return Err(Error::Config(format!(
                "File extension must not contain a dot: '{}'",
                extension
            )));
        }

        if self.device_name.trim().is_empty() {
            return Err(Error::Config("Device name cannot be empty".to_string()));
        }
        if self.device_name.contains(['/', '\\']) {
            return Err(Error::Config(
                "Device name must not contain path separators".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "No settings store implementation provided. \
                  Inject a platform adapter with .settings_store() \
                  or enable the desktop-shims feature."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(bookmarks_directory: &Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Handle, Runtime};

    let candidate = bookmarks_directory
        .parent()
        .map(|parent| parent.join("sync-settings.db"))
        .unwrap_or_else(|| bookmarks_directory.join(".sync-settings.db"));

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Runtime::new().map_err(|e| {
            Error::Internal(format!(
                "Failed to create Tokio runtime for default settings store: {}",
                e
            ))
        })?;

        runtime.block_on(SqliteSettingsStore::new(path)).map_err(|e| {
            Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
        })
    };

    // Blocking on a runtime from inside another runtime panics, so hop threads.
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(candidate))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(candidate)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_bookmarks_directory: &Path) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

#[cfg(feature = "desktop-shims")]
fn provide_default_device_name() -> String {
    bridge_desktop::device_name()
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_device_name() -> String {
    FALLBACK_DEVICE_NAME.to_string()
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    bookmarks_directory: Option<PathBuf>,
    cloud_directory: Option<PathBuf>,
    file_type: Option<FileType>,
    device_name: Option<String>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    lifecycle_observer: Option<Arc<dyn LifecycleObserver>>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the local bookmarks directory (required).
    pub fn bookmarks_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.bookmarks_directory = Some(path.into());
        self
    }

    /// Sets the cloud container directory.
    pub fn cloud_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cloud_directory = Some(path.into());
        self
    }

    /// Sets the synchronized file type.
    ///
    /// Default: `kml`
    pub fn file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    /// Sets the device name embedded into conflict copies.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn lifecycle_observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.lifecycle_observer = Some(observer);
        self
    }

    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the bookmarks directory is missing or a value
    ///   is invalid
    /// - [`Error::CapabilityMissing`] when no `SettingsStore` is available
    pub fn build(self) -> Result<CoreConfig> {
        let bookmarks_directory = self.bookmarks_directory.ok_or_else(|| {
            Error::Config(
                "Bookmarks directory is required. Use .bookmarks_directory() to set it."
                    .to_string(),
            )
        })?;

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&bookmarks_directory)?,
        };

        let config = CoreConfig {
            bookmarks_directory,
            cloud_directory: self.cloud_directory,
            file_type: self.file_type.unwrap_or_default(),
            device_name: self.device_name.unwrap_or_else(provide_default_device_name),
            settings_store,
            lifecycle_observer: self.lifecycle_observer,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
