//! In-memory browser used by tests and the `replay` subcommand.
//!
//! Models windows as ordered tab strips with one focused tab each, and
//! reports every change on an event channel the way a real browser would.
//! Ids are assigned from 1 upward, windows and tabs counting separately.

use super::{BrowserHost, TabQuery, TabRecord, WindowRecord};
use crate::error::HostError;
use crate::history::{TabId, WindowId};
use crate::router::BrowserEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct SimTab {
    id: TabId,
    opener_tab_id: Option<TabId>,
}

#[derive(Debug, Default)]
struct SimWindow {
    tabs: Vec<SimTab>,
    active: Option<TabId>,
}

impl SimWindow {
    fn position(&self, tab_id: TabId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == tab_id)
    }

    fn record(&self, window_id: WindowId, index: usize) -> TabRecord {
        let tab = &self.tabs[index];
        TabRecord {
            id: tab.id,
            window_id,
            index,
            active: self.active == Some(tab.id),
            opener_tab_id: tab.opener_tab_id,
        }
    }

    fn records(&self, window_id: WindowId) -> Vec<TabRecord> {
        (0..self.tabs.len())
            .map(|index| self.record(window_id, index))
            .collect()
    }

    /// Take `tab_id` out of the strip. If it was focused, focus passes to the
    /// tab that slides into its slot, or the new last tab.
    fn take(&mut self, tab_id: TabId) -> Option<(SimTab, Option<TabId>)> {
        let index = self.position(tab_id)?;
        let tab = self.tabs.remove(index);
        let mut newly_active = None;
        if self.active == Some(tab_id) {
            self.active = self
                .tabs
                .get(index)
                .or_else(|| self.tabs.last())
                .map(|t| t.id);
            newly_active = self.active;
        }
        Some((tab, newly_active))
    }
}

#[derive(Debug)]
struct Model {
    windows: BTreeMap<WindowId, SimWindow>,
    next_window_id: WindowId,
    next_tab_id: TabId,
}

impl Model {
    fn new() -> Self {
        Self {
            windows: BTreeMap::new(),
            next_window_id: 1,
            next_tab_id: 1,
        }
    }

    fn alloc_window(&mut self) -> WindowId {
        let id = self.next_window_id;
        self.next_window_id += 1;
        id
    }

    fn alloc_tab(&mut self) -> TabId {
        let id = self.next_tab_id;
        self.next_tab_id += 1;
        id
    }

    fn window_of(&self, tab_id: TabId) -> Option<WindowId> {
        self.windows
            .iter()
            .find(|(_, window)| window.position(tab_id).is_some())
            .map(|(&id, _)| id)
    }

    fn find(&self, tab_id: TabId) -> Option<TabRecord> {
        let window_id = self.window_of(tab_id)?;
        let window = self.windows.get(&window_id)?;
        let index = window.position(tab_id)?;
        Some(window.record(window_id, index))
    }
}

fn no_window(call: &'static str, window_id: WindowId) -> HostError {
    HostError::Api {
        call,
        message: format!("no window with id {}", window_id),
    }
}

/// Simulated browser host.
///
/// Cloning shares the same windows and event channel.
#[derive(Clone)]
pub struct SimulatedBrowser {
    model: Arc<Mutex<Model>>,
    events: mpsc::UnboundedSender<BrowserEvent>,
}

impl SimulatedBrowser {
    /// Create an empty browser and the receiver its events arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BrowserEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let browser = Self {
            model: Arc::new(Mutex::new(Model::new())),
            events,
        };
        (browser, rx)
    }

    fn emit(&self, event: BrowserEvent) {
        crate::debug_trace!("SIM", "emit {:?}", event);
        // Nobody listening is fine; tests often only inspect host state
        let _ = self.events.send(event);
    }

    fn emit_all(&self, events: Vec<BrowserEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Open a window with one focused tab. Returns `(window_id, tab_id)`.
    pub fn open_window(&self) -> (WindowId, TabId) {
        let (window_id, record) = {
            let mut model = self.model.lock();
            let window_id = model.alloc_window();
            let tab_id = model.alloc_tab();
            let window = SimWindow {
                tabs: vec![SimTab {
                    id: tab_id,
                    opener_tab_id: None,
                }],
                active: Some(tab_id),
            };
            let record = window.record(window_id, 0);
            model.windows.insert(window_id, window);
            (window_id, record)
        };
        let tab_id = record.id;
        self.emit_all(vec![
            BrowserEvent::WindowCreated { window_id },
            BrowserEvent::TabCreated(record),
            BrowserEvent::TabActivated { tab_id, window_id },
        ]);
        (window_id, tab_id)
    }

    /// Append a tab to the end of `window_id`'s strip.
    ///
    /// With `active`, the tab is focused as it is created, as when a tab is
    /// dropped into the window.
    pub fn open_tab(
        &self,
        window_id: WindowId,
        opener_tab_id: Option<TabId>,
        active: bool,
    ) -> Result<TabId, HostError> {
        let record = {
            let mut model = self.model.lock();
            if !model.windows.contains_key(&window_id) {
                return Err(no_window("tabs.create", window_id));
            }
            let tab_id = model.alloc_tab();
            let window = model
                .windows
                .get_mut(&window_id)
                .ok_or_else(|| no_window("tabs.create", window_id))?;
            window.tabs.push(SimTab {
                id: tab_id,
                opener_tab_id,
            });
            if active {
                window.active = Some(tab_id);
            }
            window.record(window_id, window.tabs.len() - 1)
        };
        let tab_id = record.id;
        self.emit(BrowserEvent::TabCreated(record));
        if active {
            self.emit(BrowserEvent::TabActivated { tab_id, window_id });
        }
        Ok(tab_id)
    }

    /// Focus a tab, as a user click would
    pub fn activate(&self, tab_id: TabId) -> Result<(), HostError> {
        let window_id = {
            let mut model = self.model.lock();
            let window_id = model
                .window_of(tab_id)
                .ok_or(HostError::TabNotFound(tab_id))?;
            if let Some(window) = model.windows.get_mut(&window_id) {
                window.active = Some(tab_id);
            }
            window_id
        };
        self.emit(BrowserEvent::TabActivated { tab_id, window_id });
        Ok(())
    }

    /// Close one tab. A window left without tabs closes with it.
    pub fn close_tab(&self, tab_id: TabId) -> Result<(), HostError> {
        let mut events = Vec::new();
        {
            let mut model = self.model.lock();
            let window_id = model
                .window_of(tab_id)
                .ok_or(HostError::TabNotFound(tab_id))?;
            let Some(window) = model.windows.get_mut(&window_id) else {
                return Err(HostError::TabNotFound(tab_id));
            };
            let Some((_, newly_active)) = window.take(tab_id) else {
                return Err(HostError::TabNotFound(tab_id));
            };
            let is_window_closing = window.tabs.is_empty();
            if is_window_closing {
                model.windows.remove(&window_id);
            }
            events.push(BrowserEvent::TabRemoved {
                tab_id,
                window_id,
                is_window_closing,
            });
            if let Some(next) = newly_active {
                events.push(BrowserEvent::TabActivated {
                    tab_id: next,
                    window_id,
                });
            }
        }
        self.emit_all(events);
        Ok(())
    }

    /// Close a window and all of its tabs at once.
    ///
    /// The window is gone before any removal event is delivered; events
    /// arrive from the last tab in the strip to the first.
    pub fn close_window(&self, window_id: WindowId) -> Result<(), HostError> {
        let window = self
            .model
            .lock()
            .windows
            .remove(&window_id)
            .ok_or_else(|| no_window("windows.remove", window_id))?;
        let events = window
            .tabs
            .iter()
            .rev()
            .map(|tab| BrowserEvent::TabRemoved {
                tab_id: tab.id,
                window_id,
                is_window_closing: true,
            })
            .collect();
        self.emit_all(events);
        Ok(())
    }

    /// Drag a tab out into a new window of its own. Returns the new window id.
    pub fn detach_tab(&self, tab_id: TabId) -> Result<WindowId, HostError> {
        let mut events = Vec::new();
        let new_window_id = {
            let mut model = self.model.lock();
            let old_window_id = model
                .window_of(tab_id)
                .ok_or(HostError::TabNotFound(tab_id))?;
            let Some(old_window) = model.windows.get_mut(&old_window_id) else {
                return Err(HostError::TabNotFound(tab_id));
            };
            let Some((tab, newly_active)) = old_window.take(tab_id) else {
                return Err(HostError::TabNotFound(tab_id));
            };
            if old_window.tabs.is_empty() {
                model.windows.remove(&old_window_id);
            }
            events.push(BrowserEvent::TabDetached {
                tab_id,
                old_window_id,
            });
            if let Some(next) = newly_active {
                events.push(BrowserEvent::TabActivated {
                    tab_id: next,
                    window_id: old_window_id,
                });
            }

            let new_window_id = model.alloc_window();
            model.windows.insert(
                new_window_id,
                SimWindow {
                    tabs: vec![tab],
                    active: Some(tab_id),
                },
            );
            events.push(BrowserEvent::WindowCreated {
                window_id: new_window_id,
            });
            events.push(BrowserEvent::TabActivated {
                tab_id,
                window_id: new_window_id,
            });
            new_window_id
        };
        self.emit_all(events);
        Ok(new_window_id)
    }

    /// Currently focused tab of `window_id`
    pub fn active_tab(&self, window_id: WindowId) -> Option<TabId> {
        self.model
            .lock()
            .windows
            .get(&window_id)
            .and_then(|window| window.active)
    }

    /// Tab ids of `window_id` in strip order
    pub fn tab_order(&self, window_id: WindowId) -> Vec<TabId> {
        self.model
            .lock()
            .windows
            .get(&window_id)
            .map(|window| window.tabs.iter().map(|tab| tab.id).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrowserHost for SimulatedBrowser {
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabRecord>, HostError> {
        let model = self.model.lock();
        Ok(model
            .windows
            .iter()
            .flat_map(|(&id, window)| window.records(id))
            .filter(|tab| query.matches(tab))
            .collect())
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<Option<TabRecord>, HostError> {
        Ok(self.model.lock().find(tab_id))
    }

    async fn all_windows(&self) -> Result<Vec<WindowRecord>, HostError> {
        let model = self.model.lock();
        Ok(model
            .windows
            .iter()
            .map(|(&id, window)| WindowRecord {
                id,
                tabs: window.records(id),
            })
            .collect())
    }

    async fn move_tab(&self, tab_id: TabId, index: usize) -> Result<(), HostError> {
        let mut model = self.model.lock();
        let window_id = model
            .window_of(tab_id)
            .ok_or(HostError::TabNotFound(tab_id))?;
        let window = model
            .windows
            .get_mut(&window_id)
            .ok_or(HostError::TabNotFound(tab_id))?;
        let from = window
            .position(tab_id)
            .ok_or(HostError::TabNotFound(tab_id))?;
        let tab = window.tabs.remove(from);
        let to = index.min(window.tabs.len());
        window.tabs.insert(to, tab);
        crate::debug_trace!("SIM", "moved tab {} from {} to {}", tab_id, from, to);
        Ok(())
    }

    async fn activate_tab(&self, tab_id: TabId) -> Result<(), HostError> {
        self.activate(tab_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<BrowserEvent>) -> Vec<BrowserEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_open_window_reports_creation_and_focus() {
        let (browser, mut rx) = SimulatedBrowser::new();
        let (window_id, tab_id) = browser.open_window();

        assert_eq!((window_id, tab_id), (1, 1));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], BrowserEvent::WindowCreated { window_id: 1 });
        assert_eq!(
            events[2],
            BrowserEvent::TabActivated {
                tab_id: 1,
                window_id: 1
            }
        );
        assert_eq!(browser.active_tab(1), Some(1));
    }

    #[tokio::test]
    async fn test_background_tab_is_appended_unfocused() {
        let (browser, mut rx) = SimulatedBrowser::new();
        let (window_id, first) = browser.open_window();
        drain(&mut rx);

        let second = browser.open_tab(window_id, Some(first), false).unwrap();
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        let BrowserEvent::TabCreated(record) = &events[0] else {
            panic!("expected TabCreated, got {:?}", events[0]);
        };
        assert_eq!(record.id, second);
        assert_eq!(record.index, 1);
        assert_eq!(record.opener_tab_id, Some(first));
        assert!(!record.active);
        assert_eq!(browser.active_tab(window_id), Some(first));
    }

    #[tokio::test]
    async fn test_closing_focused_tab_focuses_neighbor() {
        let (browser, mut rx) = SimulatedBrowser::new();
        let (window_id, first) = browser.open_window();
        let second = browser.open_tab(window_id, None, true).unwrap();
        drain(&mut rx);

        browser.close_tab(second).unwrap();
        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                BrowserEvent::TabRemoved {
                    tab_id: second,
                    window_id,
                    is_window_closing: false
                },
                BrowserEvent::TabActivated {
                    tab_id: first,
                    window_id
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_close_window_removes_everything_first() {
        let (browser, mut rx) = SimulatedBrowser::new();
        let (window_id, _) = browser.open_window();
        browser.open_tab(window_id, None, false).unwrap();
        drain(&mut rx);

        browser.close_window(window_id).unwrap();
        assert!(browser.all_windows().await.unwrap().is_empty());
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| matches!(
            event,
            BrowserEvent::TabRemoved {
                is_window_closing: true,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_detach_moves_tab_to_new_window() {
        let (browser, mut rx) = SimulatedBrowser::new();
        let (old_window, first) = browser.open_window();
        let second = browser.open_tab(old_window, None, true).unwrap();
        drain(&mut rx);

        let new_window = browser.detach_tab(second).unwrap();
        assert_eq!(browser.tab_order(old_window), vec![first]);
        assert_eq!(browser.tab_order(new_window), vec![second]);
        assert_eq!(browser.active_tab(new_window), Some(second));

        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            BrowserEvent::TabDetached {
                tab_id: second,
                old_window_id: old_window
            }
        );
    }

    #[tokio::test]
    async fn test_move_tab_clamps_index() {
        let (browser, _rx) = SimulatedBrowser::new();
        let (window_id, first) = browser.open_window();
        let second = browser.open_tab(window_id, None, false).unwrap();
        let third = browser.open_tab(window_id, None, false).unwrap();

        browser.move_tab(third, 1).await.unwrap();
        assert_eq!(browser.tab_order(window_id), vec![first, third, second]);

        browser.move_tab(first, 99).await.unwrap();
        assert_eq!(browser.tab_order(window_id), vec![third, second, first]);
    }

    #[tokio::test]
    async fn test_query_filters_by_window_and_focus() {
        let (browser, _rx) = SimulatedBrowser::new();
        let (w1, t1) = browser.open_window();
        browser.open_tab(w1, None, false).unwrap();
        let (w2, t2) = browser.open_window();

        let active = browser.query_tabs(TabQuery::active_tabs()).await.unwrap();
        let ids: Vec<TabId> = active.iter().map(|tab| tab.id).collect();
        assert_eq!(ids, vec![t1, t2]);

        let in_w2 = browser.query_tabs(TabQuery::active_in(w2)).await.unwrap();
        assert_eq!(in_w2.len(), 1);
        assert_eq!(in_w2[0].window_id, w2);
    }

    #[tokio::test]
    async fn test_unknown_tab_errors() {
        let (browser, _rx) = SimulatedBrowser::new();
        assert!(matches!(
            browser.activate_tab(42).await,
            Err(HostError::TabNotFound(42))
        ));
        assert_eq!(browser.get_tab(42).await.unwrap(), None);
        assert!(!browser.tab_exists(42).await.unwrap());
    }
}
