// Public modules
pub mod config;
pub mod credentials;
pub mod error;
pub mod git;
pub mod health;
pub mod lock;
pub mod sync;
pub mod typegen;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
