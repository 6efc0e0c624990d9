use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by the cloud container or the directory monitors.
///
/// The set is closed. The first three variants are transient: the session keeps
/// running and the error is only surfaced to observers. The rest end the
/// current synchronization session.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronizationError {
    #[error("File is unavailable")]
    FileUnavailable,

    #[error("File was not uploaded because the cloud quota is exceeded")]
    FileNotUploadedDueToQuota,

    #[error("Ubiquity server is not available")]
    UbiquityServerNotAvailable,

    #[error("Cloud storage is not available")]
    ICloudIsNotAvailable,

    #[error("Failed to open local directory file descriptor")]
    FailedToOpenLocalDirectoryFileDescriptor,

    #[error("Failed to retrieve local directory content")]
    FailedToRetrieveLocalDirectoryContent,

    #[error("Cloud container not found")]
    ContainerNotFound,
}

impl SynchronizationError {
    /// Returns `true` when the error must stop the current session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ICloudIsNotAvailable
                | Self::FailedToOpenLocalDirectoryFileDescriptor
                | Self::FailedToRetrieveLocalDirectoryContent
                | Self::ContainerNotFound
        )
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Synchronization error: {0}")]
    Synchronization(#[from] SynchronizationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// The taxonomy error carried by this failure, if any.
    pub fn synchronization_error(&self) -> Option<SynchronizationError> {
        match self {
            Self::Synchronization(error) => Some(*error),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!SynchronizationError::FileUnavailable.is_fatal());
        assert!(!SynchronizationError::FileNotUploadedDueToQuota.is_fatal());
        assert!(!SynchronizationError::UbiquityServerNotAvailable.is_fatal());

        assert!(SynchronizationError::ICloudIsNotAvailable.is_fatal());
        assert!(SynchronizationError::FailedToOpenLocalDirectoryFileDescriptor.is_fatal());
        assert!(SynchronizationError::FailedToRetrieveLocalDirectoryContent.is_fatal());
        assert!(SynchronizationError::ContainerNotFound.is_fatal());
    }

    #[test]
    fn test_bridge_error_exposes_taxonomy() {
        let error: BridgeError = SynchronizationError::ContainerNotFound.into();
        assert_eq!(
            error.synchronization_error(),
            Some(SynchronizationError::ContainerNotFound)
        );

        let other = BridgeError::OperationFailed("boom".to_string());
        assert_eq!(other.synchronization_error(), None);
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&SynchronizationError::FileNotUploadedDueToQuota).unwrap();
        assert_eq!(json, "\"file_not_uploaded_due_to_quota\"");
    }
}
