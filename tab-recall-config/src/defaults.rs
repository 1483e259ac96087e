//! Default value functions for configuration.
//!
//! Used as `#[serde(default = "crate::defaults::...")]` attributes on
//! `Config` fields.

pub fn bool_true() -> bool {
    true
}

/// Upper bound on replacement-resolution iterations after a tab closes.
///
/// Each iteration drops one stale tab from the window's history, so this
/// only trips if the history holds more closed tabs than any real window.
pub fn max_resolve_attempts() -> usize {
    64
}

pub fn log_level() -> crate::types::LogLevel {
    crate::types::LogLevel::Off
}
