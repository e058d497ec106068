//! # LoopForge Common Library
//!
//! Shared code for the LoopForge backend:
//! - Error types (`ForgeError`)
//! - Event types (`ForgeEvent` enum) and the `EventBus`
//! - Database pool, models and queries
//! - Storage layout and file operations
//! - Configuration loading

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod storage;

pub use error::{Error, Result};
pub use events::{EventBus, ForgeEvent};
pub use storage::Storage;
