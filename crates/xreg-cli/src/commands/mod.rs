//! CLI command implementations

pub mod completions;
pub mod config;
pub mod path;
pub mod registry;
pub mod serve;
