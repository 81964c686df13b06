//! Reference article cache: the set of WikiProject New Zealand article titles.
//!
//! - Populated once at startup (blocking, bounded retries, fatal on exhaustion).
//! - Refreshed on a timer by a single background task; each refresh builds a new
//!   set (old ∪ new) and swaps it in whole, so readers only ever see complete
//!   snapshots.
//! - Titles are never evicted.

pub mod petscan;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::retry::RetryPolicy;

pub use petscan::PetscanSource;

/// Cursor format accepted by the title query (`after=YYYYMMDDHHMMSS`, UTC).
pub const CURSOR_FORMAT: &str = "%Y%m%d%H%M%S";

/// Backend that lists article titles, optionally only those changed after a cursor.
#[async_trait]
pub trait TitleSource: Send + Sync {
    async fn fetch_titles(&self, after: Option<&str>) -> Result<Vec<String>>;
    fn name(&self) -> &'static str;
}

/// Normalize a page title for membership tests: drop any `#fragment`,
/// `_` → space, collapse whitespace, uppercase the first character.
pub fn normalize_title(raw: &str) -> String {
    let no_fragment = raw.split('#').next().unwrap_or_default();
    let spaced = no_fragment.replace('_', " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Initializing,
    Ready,
    Refreshing,
}

/// One complete, immutable generation of the cache.
#[derive(Debug, Default)]
pub struct Snapshot {
    titles: HashSet<String>,
    cursor: Option<String>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Membership test on a raw title (normalized first).
    pub fn contains(&self, title: &str) -> bool {
        self.titles.contains(&normalize_title(title))
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

pub struct ArticleCache {
    current: RwLock<Arc<Snapshot>>,
    state: RwLock<CacheState>,
    // single writer: refreshes never interleave
    writer: Mutex<()>,
}

impl ArticleCache {
    fn empty() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            state: RwLock::new(CacheState::Initializing),
            writer: Mutex::new(()),
        }
    }

    /// Cache seeded from a fixed title list, already `Ready`. Tests and offline runs.
    pub fn from_titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cache = Self::empty();
        let snap = Snapshot {
            titles: titles
                .into_iter()
                .map(|t| normalize_title(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
            cursor: None,
            refreshed_at: None,
        };
        cache.swap(snap);
        cache.set_state(CacheState::Ready);
        cache
    }

    /// Blocking initial population. Each attempt is bounded by `timeout`; retries back
    /// off per `policy`, and exhausting it is an error the caller must treat as fatal.
    pub async fn populate(
        source: &dyn TitleSource,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let cache = Self::empty();
        info!(target: "articles", source = source.name(), "beginning initial population of article titles");
        let target = &cache;
        policy
            .run(
                move |_| async move {
                    tokio::time::timeout(timeout, target.refresh_inner(source))
                        .await
                        .map_err(|_| anyhow!("title query timed out after {timeout:?}"))?
                },
                |_| true,
            )
            .await
            .with_context(|| {
                format!(
                    "initial article population failed after {} attempt(s)",
                    policy.attempts
                )
            })?;
        cache.set_state(CacheState::Ready);
        Ok(cache)
    }

    /// Current snapshot. Holding it pins one consistent generation.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(g) => Arc::clone(&g),
            Err(poison) => Arc::clone(&poison.into_inner()),
        }
    }

    pub fn contains(&self, title: &str) -> bool {
        self.snapshot().contains(title)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn cursor(&self) -> Option<String> {
        self.snapshot().cursor().map(str::to_string)
    }

    pub fn state(&self) -> CacheState {
        match self.state.read() {
            Ok(g) => *g,
            Err(poison) => *poison.into_inner(),
        }
    }

    fn set_state(&self, s: CacheState) {
        match self.state.write() {
            Ok(mut g) => *g = s,
            Err(poison) => *poison.into_inner() = s,
        }
    }

    fn swap(&self, next: Snapshot) {
        let next = Arc::new(next);
        match self.current.write() {
            Ok(mut g) => *g = next,
            Err(poison) => *poison.into_inner() = next,
        }
    }

    /// One incremental refresh cycle. On failure the previous snapshot and cursor stay.
    /// The cache returns to `Ready` even if this future is dropped mid-query.
    pub async fn refresh(&self, source: &dyn TitleSource) -> Result<usize> {
        self.set_state(CacheState::Refreshing);
        let _ready = ReadyOnDrop(self);
        let out = self.refresh_inner(source).await;
        if out.is_err() {
            counter!("reference_refresh_failures_total").increment(1);
        }
        out
    }

    async fn refresh_inner(&self, source: &dyn TitleSource) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let prev = self.snapshot();
        let issued_at = Utc::now();
        let cursor = issued_at.format(CURSOR_FORMAT).to_string();

        info!(target: "articles", after = ?prev.cursor(), "querying article titles");
        let fetched = source
            .fetch_titles(prev.cursor())
            .await
            .with_context(|| format!("fetching titles from {}", source.name()))?;

        let mut titles = prev.titles.clone();
        let before = titles.len();
        titles.extend(
            fetched
                .iter()
                .map(|t| normalize_title(t))
                .filter(|t| !t.is_empty()),
        );
        let added = titles.len() - before;

        self.swap(Snapshot {
            titles,
            cursor: Some(cursor.clone()),
            refreshed_at: Some(issued_at),
        });
        let size = self.len();
        gauge!("reference_articles").set(size as f64);
        info!(target: "articles", %cursor, added, size, "article title set updated");
        Ok(added)
    }
}

struct ReadyOnDrop<'a>(&'a ArticleCache);

impl Drop for ReadyOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set_state(CacheState::Ready);
    }
}

/// Lifecycle handle of the background refresher.
pub struct RefreshHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RefreshHandle {
    /// Ask the refresher to stop; it checks between cycles.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Cancel and wait for the task to finish its current cycle.
    pub async fn shutdown(self) {
        self.cancel();
        if let Err(e) = self.join.await {
            warn!(target: "articles", error = ?e, "refresher task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawn the periodic refresher. The first refresh runs one `interval` after start
/// (the cache is already populated). A failed or timed-out cycle is logged and the
/// next tick retries.
pub fn spawn_refresher(
    cache: Arc<ArticleCache>,
    source: Arc<dyn TitleSource>,
    interval: Duration,
    timeout: Duration,
) -> RefreshHandle {
    let (tx, mut rx) = watch::channel(false);
    let join = tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = rx.changed() => {
                    if changed.is_err() || *rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            info!(target: "articles", "running periodic article refresh");
            match tokio::time::timeout(timeout, cache.refresh(source.as_ref())).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(target: "articles", error = ?e, "article refresh failed"),
                Err(_) => {
                    counter!("reference_refresh_failures_total").increment(1);
                    warn!(target: "articles", ?timeout, "article refresh timed out");
                }
            }
            if *rx.borrow() {
                break;
            }
        }
        info!(target: "articles", "article refresher stopped");
    });
    RefreshHandle { cancel: tx, join }
}
