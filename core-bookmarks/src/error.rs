use bridge_traits::BridgeError;
use thiserror::Error;

use crate::recently_deleted::IndexPath;

#[derive(Error, Debug)]
pub enum BookmarksError {
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("No category at section {}, row {}", .0.section, .0.row)]
    InvalidIndexPath(IndexPath),
}

pub type Result<T> = std::result::Result<T, BookmarksError>;
