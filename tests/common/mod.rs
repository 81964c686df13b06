// tests/common/mod.rs
//
// In-memory stand-ins for the external services.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use macron_monitor::alerts::{AlertDocument, DocumentError, PageSnapshot};
use macron_monitor::diff::{DiffError, DiffProvider};
use macron_monitor::model::DiffContext;

/// Wiki pages kept in memory with a revision counter as the conflict base.
#[derive(Default)]
pub struct MemoryDocument {
    pages: Mutex<HashMap<String, (String, u64)>>,
    /// Writes that lose a race against a simulated foreign edit.
    pub interfere: AtomicU32,
    pub deny: AtomicBool,
    /// Artificial latency per call.
    pub delay: Mutex<Option<Duration>>,
    pub writes: AtomicU32,
}

impl MemoryDocument {
    pub fn with_page(page: &str, text: &str) -> Self {
        let doc = Self::default();
        doc.pages
            .lock()
            .unwrap()
            .insert(page.to_string(), (text.to_string(), 1));
        doc
    }

    pub fn text(&self, page: &str) -> Option<String> {
        self.pages.lock().unwrap().get(page).map(|(t, _)| t.clone())
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl AlertDocument for MemoryDocument {
    async fn read(&self, page: &str) -> Result<Option<PageSnapshot>, DocumentError> {
        self.pause().await;
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(page)
            .map(|(text, rev)| PageSnapshot {
                text: text.clone(),
                base: rev.to_string(),
            }))
    }

    async fn write(
        &self,
        page: &str,
        text: &str,
        base: Option<&PageSnapshot>,
        _summary: &str,
    ) -> Result<(), DocumentError> {
        self.pause().await;
        if self.deny.load(Ordering::SeqCst) {
            return Err(DocumentError::Permission("blocked".into()));
        }
        let mut pages = self.pages.lock().unwrap();

        let pending = self.interfere.load(Ordering::SeqCst);
        if pending > 0 {
            self.interfere.store(pending - 1, Ordering::SeqCst);
            let entry = pages
                .entry(page.to_string())
                .or_insert_with(|| ("==Alerts==\n".to_string(), 0));
            entry.0.push_str("* foreign edit\n");
            entry.1 += 1;
        }

        let current = pages.get(page).map(|(_, rev)| rev.to_string());
        if current.as_deref() != base.map(|b| b.base.as_str()) {
            return Err(DocumentError::Conflict(page.to_string()));
        }
        let next = pages.get(page).map(|(_, rev)| rev + 1).unwrap_or(1);
        pages.insert(page.to_string(), (text.to_string(), next));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Diffs served from a table keyed by the new revision id.
#[derive(Default)]
pub struct TableDiffs {
    diffs: Mutex<HashMap<u64, DiffContext>>,
    /// Transient failures returned before any answer, per revision.
    failures: Mutex<HashMap<u64, VecDeque<DiffError>>>,
    pub calls: AtomicU32,
}

impl TableDiffs {
    pub fn insert(&self, new: u64, diff: DiffContext) {
        self.diffs.lock().unwrap().insert(new, diff);
    }

    pub fn fail_transiently(&self, new: u64, times: usize) {
        let q = (0..times)
            .map(|_| DiffError::Transport(anyhow!("503 from diff service")))
            .collect();
        self.failures.lock().unwrap().insert(new, q);
    }
}

#[async_trait]
impl DiffProvider for TableDiffs {
    async fn fetch_diff(&self, _old: u64, new: u64) -> Result<DiffContext, DiffError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&new)
            .and_then(|q| q.pop_front())
        {
            return Err(e);
        }
        self.diffs
            .lock()
            .unwrap()
            .get(&new)
            .cloned()
            .ok_or_else(|| DiffError::Malformed(format!("nosuchrevid {new}")))
    }

    fn name(&self) -> &'static str {
        "table"
    }
}
