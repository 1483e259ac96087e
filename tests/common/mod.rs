//! Shared integration test helpers for tab-recall.
//!
//! Include this module at the top of each test file that needs it:
//!
//! ```ignore
//! mod common;
//! use common::{FlakyStore, StaticHost, TestContext};
//! ```
//!
//! `#![allow(dead_code)]` suppresses warnings when only a subset of helpers
//! is used per file.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tab_recall::config::Config;
use tab_recall::history::{HistoryTracker, KeyValueStore, MemoryStore, StorageMap};
use tab_recall::router::{EventRouter, RouterOptions};
use tab_recall::{BrowserHost, HostError, StoreError, TabId, TabQuery, TabRecord, WindowId, WindowRecord};
use tempfile::TempDir;

/// Provides test isolation with automatic resource cleanup.
///
/// Wraps a `TempDir` and a `Config` whose history file lives inside it.
pub struct TestContext {
    /// Temporary directory, kept alive for the lifetime of the context.
    pub dir: TempDir,
    /// Config instance for the test.
    pub config: Config,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = Config {
            storage_path: Some(dir.path().join("history.json")),
            ..Config::default()
        };
        Self { dir, config }
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory-backed store whose writes can be made to fail on demand
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful writes so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> StorageMap {
        self.inner.entries()
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, defaults: StorageMap) -> Result<StorageMap, StoreError> {
        self.inner.get(defaults).await
    }

    async fn set(&self, items: StorageMap) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk full".to_string()));
        }
        self.inner.set(items).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Host with a hand-built set of windows that records the calls it receives
#[derive(Default)]
pub struct StaticHost {
    windows: Mutex<Vec<WindowRecord>>,
    pub activated: Mutex<Vec<TabId>>,
    pub moved: Mutex<Vec<(TabId, usize)>>,
}

impl StaticHost {
    /// Windows given as `(window_id, tab ids in strip order, focused tab)`
    pub fn new(windows: &[(WindowId, &[TabId], Option<TabId>)]) -> Arc<Self> {
        let host = Self::default();
        host.set_windows(windows);
        Arc::new(host)
    }

    pub fn set_windows(&self, windows: &[(WindowId, &[TabId], Option<TabId>)]) {
        *self.windows.lock() = windows
            .iter()
            .map(|&(id, tabs, active)| WindowRecord {
                id,
                tabs: tabs
                    .iter()
                    .enumerate()
                    .map(|(index, &tab_id)| TabRecord {
                        id: tab_id,
                        window_id: id,
                        index,
                        active: active == Some(tab_id),
                        opener_tab_id: None,
                    })
                    .collect(),
            })
            .collect();
    }

    /// Give an existing tab an opener after the fact
    pub fn set_opener(&self, tab_id: TabId, opener_tab_id: TabId) {
        for window in self.windows.lock().iter_mut() {
            for tab in window.tabs.iter_mut().filter(|t| t.id == tab_id) {
                tab.opener_tab_id = Some(opener_tab_id);
            }
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
impl BrowserHost for StaticHost {
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
        self.activated.lock().push(tab_id);
        Ok(())
    }
}

/// Tracker on a fresh in-memory store
pub fn memory_tracker() -> (HistoryTracker, MemoryStore) {
    let store = MemoryStore::new();
    let tracker = HistoryTracker::spawn(Arc::new(store.clone()));
    (tracker, store)
}

/// Router over `host` with a fresh in-memory tracker
pub fn router_for(host: Arc<dyn BrowserHost>) -> EventRouter {
    let (tracker, _) = memory_tracker();
    EventRouter::new(tracker, host, RouterOptions::default())
}

/// Record each `(tab, window)` activation in order
pub async fn seed(tracker: &HistoryTracker, entries: &[(TabId, WindowId)]) {
    for &(tab_id, window_id) in entries {
        tracker.add(tab_id, window_id).await.expect("seed add failed");
    }
}
