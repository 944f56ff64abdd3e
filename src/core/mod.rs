// Public modules
pub mod arguments;
pub mod build;
pub mod cancel;
pub mod catalog;
pub mod deploy;
pub mod error;
pub mod parameters;
pub mod project;
pub mod protection;
pub mod release_notes;
pub mod retry;

// Internal modules - not part of public API
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
