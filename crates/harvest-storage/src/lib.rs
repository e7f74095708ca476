//! Harvest Storage - SQLite settings persistence.
//!
//! Stores the few settings that outlive a capture session (currently the
//! traffic filter pattern). Captured entries are never written here.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvest_core::FilterEngine;
//! use harvest_storage::Database;
//!
//! let db = Arc::new(Database::new().unwrap());
//! let filter = FilterEngine::with_store(db);
//! filter.set_filter(r"api\.example\.com").unwrap();
//! ```

mod database;
pub mod error;
pub mod models;
mod pool;
pub mod repository;
mod schema;

pub use database::Database;
pub use error::{Result, StorageError};
pub use models::Setting;
pub use pool::ConnectionPool;
pub use repository::SettingsRepo;
