//! Scripted browser sessions for the `replay` subcommand.
//!
//! A script is a YAML list of user actions played against a
//! [`SimulatedBrowser`]. After each action every event the browser emitted is
//! routed, including events caused by the router's own host calls, before the
//! next action runs. Window and tab ids are assigned from 1 upward in creation
//! order, so scripts can refer to them directly:
//!
//! ```yaml
//! steps:
//!   - action: startup
//!   - action: open_window            # window 1, tab 1
//!   - action: open_tab               # tab 2, in the background
//!     window: 1
//!   - action: open_tab               # tab 3, dropped in and focused
//!     window: 1
//!     active: true
//!   - action: close_tab
//!     tab: 3
//!   - action: expect_latest
//!     window: 1
//!     tab: 1
//! ```

use crate::history::{HistorySnapshot, HistoryTracker, KeyValueStore, TabId, WindowId};
use crate::host::SimulatedBrowser;
use crate::router::{BrowserEvent, EventRouter, RouterOptions};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One user action (or check) in a replay script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Browser launch: history is rebuilt from the focused tabs
    Startup,
    OpenWindow,
    OpenTab {
        window: WindowId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        opener: Option<TabId>,
        #[serde(default)]
        active: bool,
    },
    Activate {
        tab: TabId,
    },
    CloseTab {
        tab: TabId,
    },
    CloseWindow {
        window: WindowId,
    },
    /// Drag a tab out into a new window
    Detach {
        tab: TabId,
    },
    /// Stop the tracker and start a new one on the same store
    Restart,
    /// Fail the replay unless the window's latest tab is `tab`
    ExpectLatest {
        window: WindowId,
        #[serde(default)]
        tab: Option<TabId>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayScript {
    #[serde(default)]
    pub steps: Vec<ReplayStep>,
}

impl ReplayScript {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let script = serde_yaml_ng::from_str(contents).context("Invalid replay script")?;
        Ok(script)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {:?}", path))?;
        Self::from_yaml(&contents).with_context(|| format!("Failed to parse {:?}", path))
    }
}

/// A simulated browser wired to a tracker and router
pub struct Replay {
    browser: SimulatedBrowser,
    events: mpsc::UnboundedReceiver<BrowserEvent>,
    store: Arc<dyn KeyValueStore>,
    options: RouterOptions,
    router: EventRouter,
}

impl Replay {
    /// Start a session on `store`, restoring whatever history it holds
    pub async fn start(store: Arc<dyn KeyValueStore>, options: RouterOptions) -> Result<Self> {
        let (browser, events) = SimulatedBrowser::new();
        let router = Self::connect(&browser, &store, options).await?;
        Ok(Self {
            browser,
            events,
            store,
            options,
            router,
        })
    }

    async fn connect(
        browser: &SimulatedBrowser,
        store: &Arc<dyn KeyValueStore>,
        options: RouterOptions,
    ) -> Result<EventRouter> {
        let history = HistoryTracker::spawn(Arc::clone(store));
        let router = EventRouter::new(history, Arc::new(browser.clone()), options);
        router
            .resume()
            .await
            .context("Failed to restore tab history")?;
        Ok(router)
    }

    pub fn browser(&self) -> &SimulatedBrowser {
        &self.browser
    }

    /// Run every step of `script` in order
    pub async fn run_script(&mut self, script: &ReplayScript) -> Result<()> {
        for (number, step) in script.steps.iter().enumerate() {
            self.apply(step)
                .await
                .with_context(|| format!("Step {} ({:?}) failed", number + 1, step))?;
        }
        Ok(())
    }

    /// Perform one action and route everything it caused
    pub async fn apply(&mut self, step: &ReplayStep) -> Result<()> {
        log::info!("replay: {:?}", step);
        match *step {
            ReplayStep::Startup => {
                self.route(BrowserEvent::Startup).await;
            }
            ReplayStep::OpenWindow => {
                let (window_id, tab_id) = self.browser.open_window();
                log::debug!("replay: opened window {} with tab {}", window_id, tab_id);
            }
            ReplayStep::OpenTab {
                window,
                opener,
                active,
            } => {
                let tab_id = self.browser.open_tab(window, opener, active)?;
                log::debug!("replay: opened tab {} in window {}", tab_id, window);
            }
            ReplayStep::Activate { tab } => self.browser.activate(tab)?,
            ReplayStep::CloseTab { tab } => self.browser.close_tab(tab)?,
            ReplayStep::CloseWindow { window } => self.browser.close_window(window)?,
            ReplayStep::Detach { tab } => {
                let window_id = self.browser.detach_tab(tab)?;
                log::debug!("replay: tab {} now in window {}", tab, window_id);
            }
            ReplayStep::Restart => {
                self.settle().await;
                self.router.history().shutdown().await?;
                self.router = Self::connect(&self.browser, &self.store, self.options).await?;
            }
            ReplayStep::ExpectLatest { window, tab } => {
                self.settle().await;
                let latest = self.router.history().latest_active_tab_id(window).await?;
                if latest != tab {
                    bail!(
                        "expected latest tab of window {} to be {:?}, found {:?}",
                        window,
                        tab,
                        latest
                    );
                }
            }
        }
        self.settle().await;
        Ok(())
    }

    async fn route(&mut self, event: BrowserEvent) {
        match self.router.accept(event.clone()).await {
            Ok(Some(follow_up)) => {
                if let Err(e) = self.router.complete(follow_up).await {
                    log::error!("replay: finishing {:?} failed: {}", event, e);
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("replay: {:?} failed: {}", event, e),
        }
    }

    /// Route queued events until the browser goes quiet.
    ///
    /// All events queued so far are accepted before any follow-up runs, the
    /// way host callbacks run ahead of the replies to earlier host calls.
    async fn settle(&mut self) {
        loop {
            let mut pending = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                match self.router.accept(event.clone()).await {
                    Ok(Some(follow_up)) => pending.push(follow_up),
                    Ok(None) => {}
                    Err(e) => log::error!("replay: {:?} failed: {}", event, e),
                }
            }
            if pending.is_empty() {
                return;
            }
            for follow_up in pending {
                if let Err(e) = self.router.complete(follow_up.clone()).await {
                    log::error!("replay: {:?} failed: {}", follow_up, e);
                }
            }
        }
    }

    /// Final history, after which the tracker is stopped
    pub async fn finish(mut self) -> Result<HistorySnapshot> {
        self.settle().await;
        let snapshot = self.router.history().snapshot().await?;
        self.router.history().shutdown().await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryStore;

    const GATE_SCRIPT: &str = r#"
steps:
  - action: startup
  - action: open_window
  - action: open_tab
    window: 1
  - action: open_tab
    window: 1
    active: true
  - action: close_tab
    tab: 3
  - action: expect_latest
    window: 1
    tab: 1
"#;

    #[test]
    fn test_parse_script() {
        let script = ReplayScript::from_yaml(GATE_SCRIPT).unwrap();
        assert_eq!(script.steps.len(), 6);
        assert_eq!(
            script.steps[3],
            ReplayStep::OpenTab {
                window: 1,
                opener: None,
                active: true
            }
        );
        assert_eq!(
            script.steps[5],
            ReplayStep::ExpectLatest {
                window: 1,
                tab: Some(1)
            }
        );
    }

    #[test]
    fn test_empty_script_has_no_steps() {
        assert_eq!(ReplayScript::from_yaml("  \n").unwrap(), ReplayScript::default());
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result = ReplayScript::from_yaml("steps:\n  - action: teleport\n");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_neighbor_focus_is_not_recorded_during_close() {
        let mut replay = Replay::start(Arc::new(MemoryStore::new()), RouterOptions::default())
            .await
            .unwrap();
        replay
            .run_script(&ReplayScript::from_yaml(GATE_SCRIPT).unwrap())
            .await
            .unwrap();

        // The browser focused tab 2 (the new last tab); history put tab 1 back
        assert_eq!(replay.browser().active_tab(1), Some(1));
        let snapshot = replay.finish().await.unwrap();
        assert_eq!(snapshot.tabs_of(1), &[1]);
        assert!(snapshot.recording);
    }

    #[tokio::test]
    async fn test_background_tab_is_placed_after_active_tab() {
        let mut replay = Replay::start(Arc::new(MemoryStore::new()), RouterOptions::default())
            .await
            .unwrap();
        replay.apply(&ReplayStep::OpenWindow).await.unwrap();
        replay
            .apply(&ReplayStep::OpenTab {
                window: 1,
                opener: None,
                active: false,
            })
            .await
            .unwrap();
        replay
            .apply(&ReplayStep::OpenTab {
                window: 1,
                opener: None,
                active: false,
            })
            .await
            .unwrap();

        // Each background tab lands right after tab 1, pushing older ones right
        assert_eq!(replay.browser().tab_order(1), vec![1, 3, 2]);
    }

    #[tokio::test]
    async fn test_restart_keeps_history() {
        let store = MemoryStore::new();
        let mut replay = Replay::start(Arc::new(store.clone()), RouterOptions::default())
            .await
            .unwrap();
        let script = ReplayScript {
            steps: vec![
                ReplayStep::OpenWindow,
                ReplayStep::OpenTab {
                    window: 1,
                    opener: Some(1),
                    active: true,
                },
                ReplayStep::Restart,
                ReplayStep::ExpectLatest {
                    window: 1,
                    tab: Some(2),
                },
            ],
        };
        replay.run_script(&script).await.unwrap();

        let snapshot = replay.finish().await.unwrap();
        assert_eq!(snapshot.tabs_of(1), &[1, 2]);
    }

    #[tokio::test]
    async fn test_failed_expectation_names_step() {
        let mut replay = Replay::start(Arc::new(MemoryStore::new()), RouterOptions::default())
            .await
            .unwrap();
        let script = ReplayScript {
            steps: vec![
                ReplayStep::OpenWindow,
                ReplayStep::ExpectLatest {
                    window: 1,
                    tab: Some(7),
                },
            ],
        };
        let err = replay.run_script(&script).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Step 2"));
    }
}
