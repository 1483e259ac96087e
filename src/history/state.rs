//! In-memory tab activation history.
//!
//! `HistoryState` is plain data with no I/O; the tracker actor owns the only
//! live instance and persists it after each mutation.

use super::{TabId, WindowId, is_valid_id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-window activation order plus its inverse index.
///
/// Invariants:
/// - a tab id appears at most once across all window lists
/// - `window_id_of_tab[t] == w` iff `t` is in `tab_list_of_window[w]`
/// - no window maps to an empty list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    /// Activation order per window, oldest first, most recent last
    pub(crate) tab_list_of_window: BTreeMap<WindowId, Vec<TabId>>,
    /// Which window's list holds each tab
    pub(crate) window_id_of_tab: BTreeMap<TabId, WindowId>,
}

impl HistoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from possibly inconsistent persisted maps.
    ///
    /// The inverse index is derived from the window lists. A tab listed under
    /// several windows stays with the window the stored index names, or else
    /// the first window listing it; a tab listed twice in one window keeps its
    /// most recent position. Returns the state and whether anything had to be
    /// repaired.
    pub fn from_parts(
        tab_list_of_window: BTreeMap<WindowId, Vec<TabId>>,
        window_id_of_tab: BTreeMap<TabId, WindowId>,
    ) -> (Self, bool) {
        let mut owner: BTreeMap<TabId, WindowId> = BTreeMap::new();
        for (&window_id, tabs) in &tab_list_of_window {
            if !is_valid_id(window_id) {
                continue;
            }
            for &tab_id in tabs {
                if !is_valid_id(tab_id) {
                    continue;
                }
                if !owner.contains_key(&tab_id) || window_id_of_tab.get(&tab_id) == Some(&window_id)
                {
                    owner.insert(tab_id, window_id);
                }
            }
        }

        let mut state = Self::new();
        for (&window_id, tabs) in &tab_list_of_window {
            let mut kept: Vec<TabId> = Vec::with_capacity(tabs.len());
            // Walk newest-first so a duplicate keeps its most recent position
            for &tab_id in tabs.iter().rev() {
                if owner.get(&tab_id) == Some(&window_id) && !kept.contains(&tab_id) {
                    kept.push(tab_id);
                }
            }
            if kept.is_empty() {
                continue;
            }
            kept.reverse();
            for &tab_id in &kept {
                state.window_id_of_tab.insert(tab_id, window_id);
            }
            state.tab_list_of_window.insert(window_id, kept);
        }

        let repaired = state.tab_list_of_window != tab_list_of_window
            || state.window_id_of_tab != window_id_of_tab;
        (state, repaired)
    }

    /// Record `tab_id` as the most recently active tab of `window_id`.
    ///
    /// Returns false without touching state when either id is invalid; the
    /// host occasionally reports "none" ids during transitions.
    pub fn add(&mut self, tab_id: TabId, window_id: WindowId) -> bool {
        if !is_valid_id(tab_id) || !is_valid_id(window_id) {
            return false;
        }
        self.remove(tab_id);
        self.tab_list_of_window
            .entry(window_id)
            .or_default()
            .push(tab_id);
        self.window_id_of_tab.insert(tab_id, window_id);
        true
    }

    /// Forget `tab_id`. Returns true if it was tracked.
    ///
    /// A window whose list becomes empty is dropped entirely.
    pub fn remove(&mut self, tab_id: TabId) -> bool {
        let Some(window_id) = self.window_id_of_tab.remove(&tab_id) else {
            return false;
        };
        if let Some(tabs) = self.tab_list_of_window.get_mut(&window_id) {
            tabs.retain(|&t| t != tab_id);
            if tabs.is_empty() {
                self.tab_list_of_window.remove(&window_id);
            }
        }
        true
    }

    /// Most recently active tab still tracked for `window_id`
    pub fn latest_active_tab_id(&self, window_id: WindowId) -> Option<TabId> {
        self.tab_list_of_window
            .get(&window_id)
            .and_then(|tabs| tabs.last().copied())
    }

    /// Window whose history currently holds `tab_id`
    pub fn window_of(&self, tab_id: TabId) -> Option<WindowId> {
        self.window_id_of_tab.get(&tab_id).copied()
    }

    /// Activation order for `window_id`, oldest first
    pub fn tabs_of(&self, window_id: WindowId) -> &[TabId] {
        self.tab_list_of_window
            .get(&window_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.tab_list_of_window.clear();
        self.window_id_of_tab.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.tab_list_of_window.is_empty()
    }

    /// Number of tracked tabs across all windows
    pub fn tab_count(&self) -> usize {
        self.window_id_of_tab.len()
    }

    /// Check both structural invariants; used by tests and after `load`.
    pub fn is_consistent(&self) -> bool {
        let mut seen = 0usize;
        for (window_id, tabs) in &self.tab_list_of_window {
            if tabs.is_empty() {
                return false;
            }
            for tab_id in tabs {
                if self.window_id_of_tab.get(tab_id) != Some(window_id) {
                    return false;
                }
                seen += 1;
            }
        }
        // Equal counts plus the membership check rules out duplicates
        seen == self.window_id_of_tab.len()
    }
}
