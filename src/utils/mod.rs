//! Generic utility primitives with zero domain knowledge.
//!
//! - `args` - CLI argument normalization
//! - `command` - Shell command execution with error handling
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell escaping and quoting
//! - `template` - String template rendering
//! - `validation` - Input validation helpers

pub mod args;
pub mod command;
pub mod io;
pub mod shell;
pub(crate) mod template;
pub mod validation;
