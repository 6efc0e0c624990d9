//! # Bookmarks Module
//!
//! Bookmark-category features that sit on top of the synchronized directory.
//!
//! ## Components
//!
//! - **Recently Deleted** (`recently_deleted`): Listing, searching, recovering
//!   and purging trashed categories

pub mod error;
pub mod recently_deleted;

pub use error::{BookmarksError, Result};
pub use recently_deleted::{
    IndexPath, RecentlyDeletedCategoriesViewModel, RecentlyDeletedCategory,
    RecentlyDeletedState, Section,
};
