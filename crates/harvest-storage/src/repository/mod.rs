//! Repository pattern implementations for database tables.

mod settings;

pub use settings::SettingsRepo;
