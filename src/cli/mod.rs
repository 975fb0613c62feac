//! CLI for key management and attachment encryption

pub mod commands;

pub use commands::*;
