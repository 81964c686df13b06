// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod alerts;
pub mod articles;
pub mod config;
pub mod detectors;
pub mod diff;
pub mod macrons;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod retry;
pub mod stream;
pub mod wiki;

// ---- Re-exports for stable public API ----
pub use crate::alerts::{AlertDocument, AlertError, AlertSink};
pub use crate::articles::{spawn_refresher, ArticleCache, CacheState, TitleSource};
pub use crate::config::MonitorConfig;
pub use crate::detectors::{Detector, DetectorChain};
pub use crate::diff::DiffProvider;
pub use crate::model::{ChangeEvent, DiffContext, Revision, SuspiciousRev};
pub use crate::monitor::Monitor;
pub use crate::stream::{ChangeSource, EventStreamSource, RawChange, StreamFilter};
pub use crate::wiki::WikiClient;
