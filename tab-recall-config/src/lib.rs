//! Configuration system for tab-recall.
//!
//! This crate provides configuration loading, saving, and default values
//! for the tab history tracker. It includes:
//!
//! - The [`Config`] struct and its YAML persistence
//! - Default value functions used by serde
//! - Typed errors for config I/O and validation

pub mod config;
pub mod defaults;
pub mod error;
mod types;

// Re-export main types for convenience
pub use config::Config;
pub use error::ConfigError;
pub use types::LogLevel;
