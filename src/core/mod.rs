// Public modules
pub mod address;
pub mod builder;
pub mod debug;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod pipeline;
pub mod relay;
pub mod ssh;
pub mod staging;
pub mod tagger;
pub mod target;
pub mod transfer;
pub mod tunnel;

// Internal modules - not part of public API
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
