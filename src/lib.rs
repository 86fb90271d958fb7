pub mod backends;
pub mod config;
pub mod embeddings;
pub mod harness;
pub mod metrics;
pub mod models;
pub mod paths;
pub mod report;

// Re-export commonly used types
pub use config::Config;
pub use harness::{QuerySet, RunCoordinator, RunResult};
