use std::path::PathBuf;

use bridge_traits::{BridgeError, SynchronizationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Synchronization(#[from] SynchronizationError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File coordination failed for {path}: {reason}")]
    Coordination { path: PathBuf, reason: String },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("File writer is not running")]
    WriterUnavailable,
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The taxonomy error carried by this failure, looking through bridge errors.
    ///
    /// `None` means the failure is not part of the synchronization taxonomy and
    /// is only logged.
    pub fn synchronization_error(&self) -> Option<SynchronizationError> {
        match self {
            Self::Synchronization(error) => Some(*error),
            Self::Bridge(error) => error.synchronization_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synchronization_error_lookup() {
        let direct = SyncError::from(SynchronizationError::FileUnavailable);
        assert_eq!(
            direct.synchronization_error(),
            Some(SynchronizationError::FileUnavailable)
        );

        let nested = SyncError::from(BridgeError::from(SynchronizationError::ContainerNotFound));
        assert_eq!(
            nested.synchronization_error(),
            Some(SynchronizationError::ContainerNotFound)
        );

        let foreign = SyncError::io(
            "/tmp/a.kml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(foreign.synchronization_error(), None);
        assert!(foreign.to_string().contains("/tmp/a.kml"));
    }
}
