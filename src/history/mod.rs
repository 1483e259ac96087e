//! Active-tab history tracker.
//!
//! Records, per window, the order in which tabs became active so the router
//! can pick which tab to focus when the active one closes or leaves.
//!
//! [`HistoryTracker`] is a cheap, cloneable handle to an actor task that owns
//! the [`HistoryState`]. Every operation is a message on one FIFO queue and
//! is applied only after the previous one finished, including its write to
//! the [`KeyValueStore`]. Calls issued from interleaved event handlers
//! therefore never observe a partially applied mutation.
//!
//! Operations are queued when the method is called, not when the returned
//! future is first polled, so call order is application order even for
//! futures that are later joined or raced.

pub mod state;
pub mod store;

pub use state::HistoryState;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StorageMap};

use crate::error::{HistoryError, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Browser tab identifier. Unique while the tab exists; reused after close.
pub type TabId = i64;
/// Browser window identifier. Unique while the window exists.
pub type WindowId = i64;

/// The host reports "no tab" / "no window" with negative sentinels (-1).
pub fn is_valid_id(id: i64) -> bool {
    id >= 0
}

/// Read-only copy of the tracker state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySnapshot {
    /// Activation order per window, oldest first
    pub tab_list_of_window: BTreeMap<WindowId, Vec<TabId>>,
    /// Window holding each tracked tab
    pub window_id_of_tab: BTreeMap<TabId, WindowId>,
    /// Whether `add` is currently recorded
    pub recording: bool,
    /// A save failed and the durable copy is behind the in-memory state
    pub unsaved_changes: bool,
}

impl HistorySnapshot {
    /// Activation order for `window_id`, oldest first
    pub fn tabs_of(&self, window_id: WindowId) -> &[TabId] {
        self.tab_list_of_window
            .get(&window_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

type Reply<T> = oneshot::Sender<Result<T, HistoryError>>;

enum Command {
    Load(Reply<()>),
    Add {
        tab_id: TabId,
        window_id: WindowId,
        reply: Reply<()>,
    },
    Remove {
        tab_id: TabId,
        reply: Reply<()>,
    },
    LatestActive {
        window_id: WindowId,
        reply: Reply<Option<TabId>>,
    },
    WindowOf {
        tab_id: TabId,
        reply: Reply<Option<WindowId>>,
    },
    Clear(Reply<()>),
    SetRecording {
        enabled: bool,
        reply: Reply<()>,
    },
    Snapshot(Reply<HistorySnapshot>),
    Shutdown(Reply<()>),
}

/// Handle to the serialized history actor.
///
/// Clones share the same queue. The actor stops once every handle is dropped
/// or [`HistoryTracker::shutdown`] is called, after finishing queued work.
#[derive(Clone)]
pub struct HistoryTracker {
    tx: mpsc::UnboundedSender<Command>,
}

impl HistoryTracker {
    /// Spawn the actor on the current tokio runtime.
    ///
    /// The tracker starts empty with recording enabled; call [`load`](Self::load)
    /// to restore persisted state.
    pub fn spawn(store: Arc<dyn KeyValueStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = HistoryActor {
            state: HistoryState::new(),
            in_operation: true,
            dirty: false,
            store,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    // Enqueue now; only the reply is awaited later
    fn request<T: Send + 'static>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> impl Future<Output = Result<T, HistoryError>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let sent = self.tx.send(make(reply)).map_err(|_| HistoryError::Closed);
        async move {
            sent?;
            rx.await.map_err(|_| HistoryError::Closed)?
        }
    }

    /// Replace in-memory state with the persisted copy.
    ///
    /// Inconsistent stored data is repaired (see [`HistoryState::from_parts`]).
    /// On failure the in-memory state is left as it was.
    pub fn load(&self) -> impl Future<Output = Result<(), HistoryError>> + Send + 'static {
        self.request(Command::Load)
    }

    /// Record `tab_id` as the most recently active tab of `window_id`.
    ///
    /// Silently ignored while recording is disabled or when either id is a
    /// "none" sentinel.
    pub fn add(
        &self,
        tab_id: TabId,
        window_id: WindowId,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send + 'static {
        self.request(move |reply| Command::Add {
            tab_id,
            window_id,
            reply,
        })
    }

    /// Forget `tab_id`; a window left with no tracked tabs is dropped.
    pub fn remove(
        &self,
        tab_id: TabId,
    ) -> impl Future<Output = Result<(), HistoryError>> + Send + 'static {
        self.request(move |reply| Command::Remove { tab_id, reply })
    }

    /// Most recently active tab still tracked for `window_id`.
    ///
    /// `None` means the window is gone or was never tracked.
    pub fn latest_active_tab_id(
        &self,
        window_id: WindowId,
    ) -> impl Future<Output = Result<Option<TabId>, HistoryError>> + Send + 'static {
        self.request(move |reply| Command::LatestActive { window_id, reply })
    }

    /// Window whose history currently holds `tab_id`
    pub fn window_of(
        &self,
        tab_id: TabId,
    ) -> impl Future<Output = Result<Option<WindowId>, HistoryError>> + Send + 'static {
        self.request(move |reply| Command::WindowOf { tab_id, reply })
    }

    /// Drop all history and re-enable recording
    pub fn clear(&self) -> impl Future<Output = Result<(), HistoryError>> + Send + 'static {
        self.request(Command::Clear)
    }

    /// Resume recording activations
    pub fn enable(&self) -> impl Future<Output = Result<(), HistoryError>> + Send + 'static {
        self.request(|reply| Command::SetRecording {
            enabled: true,
            reply,
        })
    }

    /// Suspend recording so synthetic activations are not taken as history
    pub fn disable(&self) -> impl Future<Output = Result<(), HistoryError>> + Send + 'static {
        self.request(|reply| Command::SetRecording {
            enabled: false,
            reply,
        })
    }

    /// Copy of the current state, ordered after all earlier operations
    pub fn snapshot(
        &self,
    ) -> impl Future<Output = Result<HistorySnapshot, HistoryError>> + Send + 'static {
        self.request(Command::Snapshot)
    }

    /// Let already queued operations finish, then stop the actor.
    ///
    /// Operations queued after this one, from any clone of the handle, fail
    /// with [`HistoryError::Closed`].
    pub fn shutdown(&self) -> impl Future<Output = Result<(), HistoryError>> + Send + 'static {
        self.request(Command::Shutdown)
    }
}

/// Owner of the history state; runs on its own task.
struct HistoryActor {
    state: HistoryState,
    in_operation: bool,
    /// Set when a save failed; cleared by the next successful save
    dirty: bool,
    store: Arc<dyn KeyValueStore>,
}

impl HistoryActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        crate::debug_info!("HISTORY", "History tracker started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Shutdown(reply) => {
                    let _ = reply.send(Ok(()));
                    break;
                }
                command => self.handle(command).await,
            }
        }
        crate::debug_info!("HISTORY", "History tracker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Load(reply) => {
                let _ = reply.send(self.load().await);
            }
            Command::Add {
                tab_id,
                window_id,
                reply,
            } => {
                let result = if !self.in_operation {
                    crate::debug_trace!(
                        "HISTORY",
                        "Recording disabled, ignoring add({}, {})",
                        tab_id,
                        window_id
                    );
                    Ok(())
                } else if self.state.add(tab_id, window_id) {
                    crate::debug_log!("HISTORY", "Tab {} active in window {}", tab_id, window_id);
                    self.persist().await
                } else {
                    crate::debug_trace!(
                        "HISTORY",
                        "Ignoring add with invalid ids ({}, {})",
                        tab_id,
                        window_id
                    );
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::Remove { tab_id, reply } => {
                let removed = self.state.remove(tab_id);
                if removed {
                    crate::debug_log!("HISTORY", "Removed tab {}", tab_id);
                }
                let result = if removed || self.dirty {
                    self.persist().await
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::LatestActive { window_id, reply } => {
                let _ = reply.send(Ok(self.state.latest_active_tab_id(window_id)));
            }
            Command::WindowOf { tab_id, reply } => {
                let _ = reply.send(Ok(self.state.window_of(tab_id)));
            }
            Command::Clear(reply) => {
                self.state.clear();
                self.in_operation = true;
                log::info!("Tab history cleared");
                let _ = reply.send(self.persist().await);
            }
            Command::SetRecording { enabled, reply } => {
                self.in_operation = enabled;
                crate::debug_log!(
                    "HISTORY",
                    "Recording {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                let _ = reply.send(Ok(()));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Ok(HistorySnapshot {
                    tab_list_of_window: self.state.tab_list_of_window.clone(),
                    window_id_of_tab: self.state.window_id_of_tab.clone(),
                    recording: self.in_operation,
                    unsaved_changes: self.dirty,
                }));
            }
            // Handled by `run` before dispatch
            Command::Shutdown(reply) => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn load(&mut self) -> Result<(), HistoryError> {
        let items = self.store.get(store::state_defaults()).await?;
        let (lists, index) = store::decode_parts(items)?;
        let (state, repaired) = HistoryState::from_parts(lists, index);
        debug_assert!(state.is_consistent());
        if repaired {
            log::warn!("Persisted tab history was inconsistent and has been repaired");
        }
        log::info!(
            "Loaded tab history ({} windows, {} tabs)",
            state.tab_list_of_window.len(),
            state.tab_count()
        );
        self.state = state;
        // Memory now matches what is stored (modulo repairs)
        self.dirty = repaired;
        Ok(())
    }

    async fn persist(&mut self) -> Result<(), HistoryError> {
        let result: Result<(), StoreError> = match store::encode_state(&self.state) {
            Ok(items) => self.store.set(items).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                if self.dirty {
                    log::info!("Tab history storage caught up after earlier failure");
                }
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                // Memory stays authoritative; the next successful save writes
                // the full state and reconciles storage.
                self.dirty = true;
                log::error!("Failed to persist tab history: {}", e);
                crate::debug_error!("HISTORY", "Persist failed: {}", e);
                Err(e.into())
            }
        }
    }
}
