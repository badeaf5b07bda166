//! Persistence layer: local settings and generation history.

pub mod history;
pub mod settings;

pub use history::{HistoryStore, SqliteHistoryStore};
pub use settings::{JsonSettingsStore, MemorySettingsStore, SettingsStore};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse stored settings: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Table names as constants.
pub mod tables {
    pub const PROMPTS: &str = "prompts";
    pub const GENERATED_IMAGES: &str = "generated_images";
}
