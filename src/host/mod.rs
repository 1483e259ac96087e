//! Browser host collaborator.
//!
//! The router reads tabs and windows and asks the host to move or activate
//! tabs through [`BrowserHost`]. Implementations wrap the real browser API;
//! [`SimulatedBrowser`] is an in-memory host used by tests and `replay`.

pub mod simulated;

pub use simulated::SimulatedBrowser;

use crate::error::HostError;
use crate::history::{TabId, WindowId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tab as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabRecord {
    pub id: TabId,
    pub window_id: WindowId,
    /// Zero-based position within the window's tab strip
    pub index: usize,
    /// Whether this is the focused tab of its window
    pub active: bool,
    /// Tab that opened this one (link click, scripted open)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_tab_id: Option<TabId>,
}

/// A window and its tabs, in strip order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub id: WindowId,
    pub tabs: Vec<TabRecord>,
}

/// Filter for [`BrowserHost::query_tabs`]; `None` fields match anything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabQuery {
    pub window_id: Option<WindowId>,
    pub active: Option<bool>,
}

impl TabQuery {
    /// The focused tab of every window
    pub fn active_tabs() -> Self {
        Self {
            window_id: None,
            active: Some(true),
        }
    }

    /// The focused tab of one window
    pub fn active_in(window_id: WindowId) -> Self {
        Self {
            window_id: Some(window_id),
            active: Some(true),
        }
    }

    pub fn matches(&self, tab: &TabRecord) -> bool {
        self.window_id.is_none_or(|w| w == tab.window_id)
            && self.active.is_none_or(|a| a == tab.active)
    }
}

/// Host-provided tab and window operations.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    /// Open tabs matching `query`
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabRecord>, HostError>;

    /// Look up one tab; `Ok(None)` if it no longer exists
    async fn get_tab(&self, tab_id: TabId) -> Result<Option<TabRecord>, HostError>;

    /// Every open window with its tabs populated
    async fn all_windows(&self) -> Result<Vec<WindowRecord>, HostError>;

    /// Move a tab to `index` within its current window
    async fn move_tab(&self, tab_id: TabId, index: usize) -> Result<(), HostError>;

    /// Make a tab the focused tab of its window
    async fn activate_tab(&self, tab_id: TabId) -> Result<(), HostError>;

    /// Whether `tab_id` is open in any window.
    ///
    /// Scans every window rather than looking the tab up directly: while a
    /// window is closing the host may still resolve ids of tabs it already
    /// dropped from the window list.
    async fn tab_exists(&self, tab_id: TabId) -> Result<bool, HostError> {
        let windows = self.all_windows().await?;
        Ok(windows
            .iter()
            .any(|window| window.tabs.iter().any(|tab| tab.id == tab_id)))
    }
}
