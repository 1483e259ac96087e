//! Browser event routing.
//!
//! Translates host events into history operations and, where the history
//! says so, into host calls: focusing the previous tab when the active one
//! closes or is dragged away, and placing new tabs next to the tab they were
//! opened from.
//!
//! Each event is handled in two steps. [`EventRouter::accept`] performs the
//! history operations that must happen before the next event is looked at
//! (recording an activation, forgetting a closed tab, closing the recording
//! gate). It may hand back a [`FollowUp`] with the host round-trips that
//! remain, which [`EventRouter::complete`] performs. [`EventRouter::run`]
//! accepts events strictly in arrival order and lets follow-ups finish in the
//! background, so the browser's own activation of a neighbor tab arrives
//! while the gate is closed and is not mistaken for a user choice.

use crate::config::Config;
use crate::error::{HistoryError, HostError, RouterError};
use crate::history::{HistoryTracker, TabId, WindowId};
use crate::host::{BrowserHost, TabQuery, TabRecord};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Host notifications the router reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    /// The extension was installed or updated
    Installed,
    /// The browser launched
    Startup,
    TabCreated(TabRecord),
    TabActivated {
        tab_id: TabId,
        window_id: WindowId,
    },
    /// A tab was dragged out of `old_window_id`
    TabDetached {
        tab_id: TabId,
        old_window_id: WindowId,
    },
    TabRemoved {
        tab_id: TabId,
        window_id: WindowId,
        /// The whole window is closing, not just this tab
        is_window_closing: bool,
    },
    WindowCreated {
        window_id: WindowId,
    },
}

/// Outcome of looking for a tab to focus after a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// This tab was still open and has been focused
    Activated(TabId),
    /// No tracked tab of the window remains open
    WindowGone,
}

/// Host work left over after [`EventRouter::accept`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// Focus the previous tab of a window a tab was detached from
    ActivatePrevious { tab_id: TabId },
    /// Move a new tab right after the tab that opened it
    PlaceAfterOpener { tab_id: TabId, opener_tab_id: TabId },
    /// Move a new tab right after the window's last active tab, or after its
    /// opener if the host assigned one late
    PlaceAfterAnchor {
        tab_id: TabId,
        window_id: WindowId,
        anchor: Option<TabId>,
    },
    /// Record the focused tab of a freshly created window
    RecordWindowFocus { window_id: WindowId },
    /// Pick and focus a replacement for a removed tab, then reopen the gate
    ResolveReplacement { window_id: WindowId },
}

/// Router settings taken from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    pub max_resolve_attempts: usize,
    pub position_new_tabs: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RouterOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_resolve_attempts: config.max_resolve_attempts.max(1),
            position_new_tabs: config.position_new_tabs,
        }
    }
}

/// Routes browser events to the history tracker and back to the host.
#[derive(Clone)]
pub struct EventRouter {
    history: HistoryTracker,
    host: Arc<dyn BrowserHost>,
    options: RouterOptions,
}

impl EventRouter {
    pub fn new(history: HistoryTracker, host: Arc<dyn BrowserHost>, options: RouterOptions) -> Self {
        Self {
            history,
            host,
            options,
        }
    }

    pub fn history(&self) -> &HistoryTracker {
        &self.history
    }

    /// Restore persisted history when the process starts without a browser
    /// launch (no `Startup` event will follow).
    pub async fn resume(&self) -> Result<(), RouterError> {
        self.history.load().await?;
        Ok(())
    }

    /// Consume events until the channel closes.
    ///
    /// Errors are logged; one failed event never stops the loop.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<BrowserEvent>) {
        log::info!("Event router started");
        while let Some(event) = events.recv().await {
            match self.accept(event.clone()).await {
                Ok(Some(follow_up)) => {
                    let router = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = router.complete(follow_up).await {
                            log::error!("Failed to finish handling {:?}: {}", event, e);
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => log::error!("Failed to handle {:?}: {}", event, e),
            }
        }
        log::info!("Event router stopped");
    }

    /// Handle one event to completion
    pub async fn handle(&self, event: BrowserEvent) -> Result<(), RouterError> {
        match self.accept(event).await? {
            Some(follow_up) => self.complete(follow_up).await,
            None => Ok(()),
        }
    }

    /// Apply the history side of `event` and return the host work left over.
    pub async fn accept(&self, event: BrowserEvent) -> Result<Option<FollowUp>, RouterError> {
        crate::debug_info!("ROUTER", "{:?}", event);
        match event {
            BrowserEvent::Installed | BrowserEvent::Startup => {
                self.rebuild().await?;
                Ok(None)
            }
            BrowserEvent::TabActivated { tab_id, window_id } => {
                tolerate_storage(self.history.add(tab_id, window_id).await)?;
                Ok(None)
            }
            BrowserEvent::TabDetached {
                tab_id,
                old_window_id,
            } => {
                tolerate_storage(self.history.remove(tab_id).await)?;
                let previous = self.history.latest_active_tab_id(old_window_id).await?;
                Ok(previous.map(|tab_id| FollowUp::ActivatePrevious { tab_id }))
            }
            BrowserEvent::TabCreated(tab) => self.accept_created(tab).await,
            BrowserEvent::WindowCreated { window_id } => {
                Ok(Some(FollowUp::RecordWindowFocus { window_id }))
            }
            BrowserEvent::TabRemoved {
                tab_id, window_id, ..
            } => {
                tolerate_storage(self.history.remove(tab_id).await)?;
                self.history.disable().await?;
                Ok(Some(FollowUp::ResolveReplacement { window_id }))
            }
        }
    }

    /// Perform the host work returned by [`accept`](Self::accept)
    pub async fn complete(&self, follow_up: FollowUp) -> Result<(), RouterError> {
        crate::debug_log!("ROUTER", "follow-up {:?}", follow_up);
        match follow_up {
            FollowUp::ActivatePrevious { tab_id } => match self.host.activate_tab(tab_id).await {
                Ok(()) => {
                    log::debug!("Focused previous tab {} after detach", tab_id);
                    Ok(())
                }
                Err(HostError::TabNotFound(_)) => {
                    crate::debug_log!("ROUTER", "Previous tab {} is gone, nothing to focus", tab_id);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            FollowUp::PlaceAfterOpener {
                tab_id,
                opener_tab_id,
            } => {
                let Some(opener) = self.host.get_tab(opener_tab_id).await? else {
                    crate::debug_log!("ROUTER", "Opener {} of tab {} is gone", opener_tab_id, tab_id);
                    return Ok(());
                };
                self.place_after(tab_id, &opener).await
            }
            FollowUp::PlaceAfterAnchor {
                tab_id,
                window_id,
                anchor,
            } => self.place_after_anchor(tab_id, window_id, anchor).await,
            FollowUp::RecordWindowFocus { window_id } => {
                let active = self.host.query_tabs(TabQuery::active_in(window_id)).await?;
                if let [tab] = active.as_slice() {
                    tolerate_storage(self.history.add(tab.id, window_id).await)?;
                }
                Ok(())
            }
            FollowUp::ResolveReplacement { window_id } => {
                let resolved = self.resolve_replacement(window_id).await;
                // The gate must reopen on every exit, including errors
                let reopened = self.history.enable().await;
                match resolved {
                    Ok(Resolution::Activated(tab_id)) => {
                        log::debug!("Window {} falls back to tab {}", window_id, tab_id)
                    }
                    Ok(Resolution::WindowGone) => {
                        log::debug!("Window {} has no tab left to focus", window_id)
                    }
                    Err(e) => {
                        log::error!("Resolving a replacement in window {} failed: {}", window_id, e);
                        return Err(e);
                    }
                }
                reopened?;
                Ok(())
            }
        }
    }

    /// Walk the window's history from most recent backward until a tab that
    /// is still open is found, and focus it.
    ///
    /// Tracked tabs that no longer exist (their window closed under them) are
    /// forgotten along the way. Gives up after
    /// [`RouterOptions::max_resolve_attempts`] candidates.
    pub async fn resolve_replacement(&self, window_id: WindowId) -> Result<Resolution, RouterError> {
        for attempt in 1..=self.options.max_resolve_attempts {
            let Some(candidate) = self.history.latest_active_tab_id(window_id).await? else {
                return Ok(Resolution::WindowGone);
            };
            if self.host.tab_exists(candidate).await? {
                self.host.activate_tab(candidate).await?;
                return Ok(Resolution::Activated(candidate));
            }
            crate::debug_log!(
                "ROUTER",
                "Candidate {} for window {} is gone (attempt {})",
                candidate,
                window_id,
                attempt
            );
            tolerate_storage(self.history.remove(candidate).await)?;
        }

        let attempts = self.options.max_resolve_attempts;
        crate::debug_error!(
            "ROUTER",
            "No replacement for window {} after {} attempts",
            window_id,
            attempts
        );
        Err(RouterError::ResolveLimit { attempts })
    }

    /// Reset history and seed it with every window's focused tab
    async fn rebuild(&self) -> Result<(), RouterError> {
        tolerate_storage(self.history.clear().await)?;
        let active = self.host.query_tabs(TabQuery::active_tabs()).await?;
        for tab in &active {
            tolerate_storage(self.history.add(tab.id, tab.window_id).await)?;
        }
        log::info!("Tab history rebuilt from {} open windows", active.len());
        Ok(())
    }

    async fn accept_created(&self, tab: TabRecord) -> Result<Option<FollowUp>, RouterError> {
        if !self.options.position_new_tabs {
            return Ok(None);
        }
        if let Some(opener_tab_id) = tab.opener_tab_id {
            return Ok(Some(FollowUp::PlaceAfterOpener {
                tab_id: tab.id,
                opener_tab_id,
            }));
        }
        // A tab that is focused on creation was dropped in; it stays where
        // it landed unless the host assigns an opener later.
        let anchor = if tab.active {
            None
        } else {
            self.history.latest_active_tab_id(tab.window_id).await?
        };
        Ok(Some(FollowUp::PlaceAfterAnchor {
            tab_id: tab.id,
            window_id: tab.window_id,
            anchor,
        }))
    }

    async fn place_after_anchor(
        &self,
        tab_id: TabId,
        window_id: WindowId,
        anchor: Option<TabId>,
    ) -> Result<(), RouterError> {
        // Tabs opened by other extensions get their opener only after creation
        let Some(current) = self.host.get_tab(tab_id).await? else {
            crate::debug_log!("ROUTER", "New tab {} closed before placement", tab_id);
            return Ok(());
        };
        let Some(anchor_id) = current.opener_tab_id.or(anchor) else {
            return Ok(());
        };
        let Some(anchor) = self.host.get_tab(anchor_id).await? else {
            crate::debug_log!("ROUTER", "Anchor {} of tab {} is gone", anchor_id, tab_id);
            return Ok(());
        };
        // Opening from a window's only tab can put the new tab in another window
        if anchor.window_id != window_id {
            crate::debug_log!(
                "ROUTER",
                "Anchor {} is in window {}, not moving tab {}",
                anchor_id,
                anchor.window_id,
                tab_id
            );
            return Ok(());
        }
        self.place_after(tab_id, &anchor).await
    }

    async fn place_after(&self, tab_id: TabId, anchor: &TabRecord) -> Result<(), RouterError> {
        let index = anchor.index + 1;
        crate::debug_log!("ROUTER", "Moving tab {} after {} (index {})", tab_id, anchor.id, index);
        self.host.move_tab(tab_id, index).await?;
        Ok(())
    }
}

/// Routing only depends on the in-memory history, which a failed save keeps.
/// Log the failure and carry on; a closed tracker is still an error.
fn tolerate_storage(result: Result<(), HistoryError>) -> Result<(), RouterError> {
    match result {
        Err(HistoryError::Storage(e)) => {
            log::warn!("Continuing with unsaved tab history: {}", e);
            Ok(())
        }
        other => Ok(other?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;
    use crate::host::{SimulatedBrowser, WindowRecord};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Host with a fixed set of windows that records calls
    #[derive(Default)]
    struct StubHost {
        windows: Mutex<Vec<WindowRecord>>,
        activated: Mutex<Vec<TabId>>,
        moved: Mutex<Vec<(TabId, usize)>>,
        fail_activate: bool,
    }

    impl StubHost {
        fn with_windows(windows: Vec<(WindowId, Vec<TabId>)>) -> Self {
            let windows = windows
                .into_iter()
                .map(|(id, tabs)| WindowRecord {
                    id,
                    tabs: tabs
                        .into_iter()
                        .enumerate()
                        .map(|(index, tab_id)| TabRecord {
                            id: tab_id,
                            window_id: id,
                            index,
                            active: false,
                            opener_tab_id: None,
                        })
                        .collect(),
                })
                .collect();
            Self {
                windows: Mutex::new(windows),
                ..Default::default()
            }
        }

        fn tabs(&self) -> Vec<TabRecord> {
            self.windows
                .lock()
                .iter()
                .flat_map(|w| w.tabs.clone())
                .collect()
        }
    }

    #[async_trait]
    impl BrowserHost for StubHost {
        async fn query_tabs(&self, query: TabQuery) -> Result<Vec<TabRecord>, HostError> {
            Ok(self.tabs().into_iter().filter(|t| query.matches(t)).collect())
        }

        async fn get_tab(&self, tab_id: TabId) -> Result<Option<TabRecord>, HostError> {
            Ok(self.tabs().into_iter().find(|t| t.id == tab_id))
        }

        async fn all_windows(&self) -> Result<Vec<WindowRecord>, HostError> {
            Ok(self.windows.lock().clone())
        }

        async fn move_tab(&self, tab_id: TabId, index: usize) -> Result<(), HostError> {
            self.moved.lock().push((tab_id, index));
            Ok(())
        }

        async fn activate_tab(&self, tab_id: TabId) -> Result<(), HostError> {
            if self.fail_activate {
                return Err(HostError::Api {
                    call: "tabs.update",
                    message: "host unavailable".to_string(),
                });
            }
            self.activated.lock().push(tab_id);
            Ok(())
        }
    }

    fn router_with(host: Arc<StubHost>, options: RouterOptions) -> EventRouter {
        let history = HistoryTracker::spawn(Arc::new(MemoryStore::new()));
        EventRouter::new(history, host, options)
    }

    async fn seed(router: &EventRouter, entries: &[(TabId, WindowId)]) {
        for &(tab_id, window_id) in entries {
            router.history().add(tab_id, window_id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_removed_tab_falls_back_to_previous() {
        let host = Arc::new(StubHost::with_windows(vec![(10, vec![1, 2])]));
        let router = router_with(host.clone(), RouterOptions::default());
        seed(&router, &[(1, 10), (2, 10), (3, 10)]).await;

        router
            .handle(BrowserEvent::TabRemoved {
                tab_id: 3,
                window_id: 10,
                is_window_closing: false,
            })
            .await
            .unwrap();

        assert_eq!(*host.activated.lock(), vec![2]);
        let snapshot = router.history().snapshot().await.unwrap();
        assert_eq!(snapshot.tabs_of(10), &[1, 2]);
        assert!(snapshot.recording);
    }

    #[tokio::test]
    async fn test_window_closed_as_unit_activates_nothing() {
        let host = Arc::new(StubHost::with_windows(vec![]));
        let router = router_with(host.clone(), RouterOptions::default());
        seed(&router, &[(1, 10), (2, 10)]).await;

        let resolution = {
            router.history().remove(2).await.unwrap();
            router.resolve_replacement(10).await.unwrap()
        };
        assert_eq!(resolution, Resolution::WindowGone);
        assert!(host.activated.lock().is_empty());
        assert_eq!(router.history().latest_active_tab_id(10).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_gate_closed_until_resolution_completes() {
        let host = Arc::new(StubHost::with_windows(vec![(10, vec![1, 2])]));
        let router = router_with(host.clone(), RouterOptions::default());
        seed(&router, &[(1, 10), (2, 10), (3, 10)]).await;

        let follow_up = router
            .accept(BrowserEvent::TabRemoved {
                tab_id: 3,
                window_id: 10,
                is_window_closing: false,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(follow_up, FollowUp::ResolveReplacement { window_id: 10 });

        // The browser focuses a neighbor on its own; that is not history
        router
            .handle(BrowserEvent::TabActivated {
                tab_id: 1,
                window_id: 10,
            })
            .await
            .unwrap();
        assert_eq!(router.history().latest_active_tab_id(10).await.unwrap(), Some(2));

        router.complete(follow_up).await.unwrap();
        assert_eq!(*host.activated.lock(), vec![2]);
        assert!(router.history().snapshot().await.unwrap().recording);
    }

    #[tokio::test]
    async fn test_resolution_limit_reopens_gate() {
        let host = Arc::new(StubHost::with_windows(vec![]));
        let options = RouterOptions {
            max_resolve_attempts: 2,
            position_new_tabs: true,
        };
        let router = router_with(host.clone(), options);
        seed(&router, &[(1, 10), (2, 10), (3, 10), (4, 10)]).await;

        let result = router
            .handle(BrowserEvent::TabRemoved {
                tab_id: 4,
                window_id: 10,
                is_window_closing: true,
            })
            .await;
        assert!(matches!(result, Err(RouterError::ResolveLimit { attempts: 2 })));
        assert!(router.history().snapshot().await.unwrap().recording);
        assert_eq!(router.history().latest_active_tab_id(10).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_host_error_reopens_gate() {
        let host = Arc::new(StubHost {
            fail_activate: true,
            ..StubHost::with_windows(vec![(10, vec![1])])
        });
        let router = router_with(host.clone(), RouterOptions::default());
        seed(&router, &[(1, 10), (2, 10)]).await;

        let result = router
            .handle(BrowserEvent::TabRemoved {
                tab_id: 2,
                window_id: 10,
                is_window_closing: false,
            })
            .await;
        assert!(matches!(result, Err(RouterError::Host(_))));
        assert!(router.history().snapshot().await.unwrap().recording);
    }

    #[tokio::test]
    async fn test_created_tab_with_opener_moves_after_opener() {
        let host = Arc::new(StubHost::with_windows(vec![(10, vec![1, 2, 3, 4])]));
        let router = router_with(host.clone(), RouterOptions::default());

        router
            .handle(BrowserEvent::TabCreated(TabRecord {
                id: 4,
                window_id: 10,
                index: 3,
                active: false,
                opener_tab_id: Some(1),
            }))
            .await
            .unwrap();
        assert_eq!(*host.moved.lock(), vec![(4, 1)]);
    }

    #[tokio::test]
    async fn test_positioning_can_be_disabled() {
        let host = Arc::new(StubHost::with_windows(vec![(10, vec![1, 2])]));
        let options = RouterOptions {
            position_new_tabs: false,
            ..RouterOptions::default()
        };
        let router = router_with(host.clone(), options);

        let follow_up = router
            .accept(BrowserEvent::TabCreated(TabRecord {
                id: 2,
                window_id: 10,
                index: 1,
                active: false,
                opener_tab_id: Some(1),
            }))
            .await
            .unwrap();
        assert_eq!(follow_up, None);
        assert!(host.moved.lock().is_empty());
    }

    #[tokio::test]
    async fn test_detach_focuses_previous_tab_of_old_window() {
        let (browser, _rx) = SimulatedBrowser::new();
        let (window_id, first) = browser.open_window();
        let second = browser.open_tab(window_id, None, true).unwrap();
        let history = HistoryTracker::spawn(Arc::new(MemoryStore::new()));
        let router = EventRouter::new(history, Arc::new(browser.clone()), RouterOptions::default());
        seed(&router, &[(first, window_id), (second, window_id)]).await;

        browser.detach_tab(second).unwrap();
        router
            .handle(BrowserEvent::TabDetached {
                tab_id: second,
                old_window_id: window_id,
            })
            .await
            .unwrap();

        assert_eq!(browser.active_tab(window_id), Some(first));
        assert_eq!(router.history().window_of(second).await.unwrap(), None);
    }
}
