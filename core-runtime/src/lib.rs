//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the bookmarks synchronization core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Other workspace crates depend on this one for their logging conventions,
//! for the validated [`CoreConfig`](config::CoreConfig), and for the
//! [`EventBus`](events::EventBus) that carries lifecycle, settings and
//! synchronization events between the host and the core.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
