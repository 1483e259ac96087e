// Library exports for the binary and integration tests
//
// # Concurrency Policy
//
// tab-recall is driven by host events that interleave on a tokio runtime.
// New code should follow these rules:
//
//   - Tab history is owned by the `history` actor task. Nothing else holds the
//     maps; all reads and writes are messages on its queue, so operations are
//     applied in the order they were issued.
//
//   - `parking_lot::Mutex`: use for sync-only state behind async traits
//     (in-memory stores, the simulated browser). Never hold one across an
//     `.await`.
//
//   - `tokio::sync` channels: use to hand work between tasks (history queue,
//     browser event stream, oneshot replies).

/// Application version (root crate version, for use by sub-crates).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[macro_use]
pub mod debug;

pub mod cli;
pub mod config {
    //! Configuration re-exports from the `tab-recall-config` sub-crate.
    pub use tab_recall_config::{Config, ConfigError, LogLevel};
}
pub mod error;
pub mod history;
pub mod host;
pub mod replay;
pub mod router;

pub use error::{HistoryError, HostError, RouterError, StoreError};
pub use history::{HistorySnapshot, HistoryTracker, TabId, WindowId};
pub use host::{BrowserHost, TabQuery, TabRecord, WindowRecord};
pub use router::{BrowserEvent, EventRouter, FollowUp, Resolution, RouterOptions};
