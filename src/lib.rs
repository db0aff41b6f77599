// Core modules
pub mod audit;
pub mod backfill;
pub mod config;
pub mod continuity;
pub mod decision;
pub mod exchange;
pub mod execution;
pub mod features;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
