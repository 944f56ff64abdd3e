//! CLI output layer.

mod response;

pub use response::*;
