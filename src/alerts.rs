//! Alert sink: prepends rendered reports to a wiki page right below a fixed anchor.
//!
//! The page is editable by anyone and there is no transactional write, so an append
//! can lose a race with a concurrent edit. A conflict gets exactly one retry (fresh
//! read, fresh insert); a second conflict is returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use crate::model::SuspiciousRev;

/// Line after which new alerts are inserted.
pub const ALERT_ANCHOR: &str = "==Alerts==";

pub const DEFAULT_EDIT_SUMMARY: &str = "Reporting suspicious edit(s) to Māori words";

/// Current text of a page plus the token its next write is based on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub text: String,
    /// Opaque base marker (MediaWiki: revision timestamp) used for conflict detection.
    pub base: String,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("edit conflict on {0}")]
    Conflict(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Backing store of alert pages.
#[async_trait]
pub trait AlertDocument: Send + Sync {
    /// `None` when the page does not exist yet.
    async fn read(&self, page: &str) -> Result<Option<PageSnapshot>, DocumentError>;

    /// Replace the page text. `base` is `None` when creating the page.
    async fn write(
        &self,
        page: &str,
        text: &str,
        base: Option<&PageSnapshot>,
        summary: &str,
    ) -> Result<(), DocumentError>;
}

#[async_trait]
impl<T: AlertDocument + ?Sized> AlertDocument for Arc<T> {
    async fn read(&self, page: &str) -> Result<Option<PageSnapshot>, DocumentError> {
        (**self).read(page).await
    }

    async fn write(
        &self,
        page: &str,
        text: &str,
        base: Option<&PageSnapshot>,
        summary: &str,
    ) -> Result<(), DocumentError> {
        (**self).write(page, text, base, summary).await
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("edit conflict on {page} persisted after retry")]
    Conflict { page: String },
    #[error("alert anchor `==Alerts==` not found on {page}")]
    MissingAnchor { page: String },
    #[error("alert page {page} timed out after {timeout:?}")]
    Timeout { page: String, timeout: Duration },
    #[error("not allowed to edit {page}: {reason}")]
    Permission { page: String, reason: String },
    #[error("alert page {page}: {source}")]
    Document {
        page: String,
        #[source]
        source: DocumentError,
    },
}

impl AlertError {
    /// Permission failures mean every later alert will fail too.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Permission { .. })
    }
}

/// Insert `line` directly below the first line equal to [`ALERT_ANCHOR`].
/// `None` when the anchor is absent.
pub fn insert_after_anchor(text: &str, line: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len() + line.len() + 1);
    let mut inserted = false;
    for chunk in text.split_inclusive('\n') {
        out.push_str(chunk);
        if !inserted && chunk.trim_end_matches(['\r', '\n']).trim() == ALERT_ANCHOR {
            if !chunk.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
            inserted = true;
        }
    }
    inserted.then_some(out)
}

pub struct AlertSink<D> {
    doc: D,
    summary: String,
    timeout: Duration,
}

impl<D: AlertDocument> AlertSink<D> {
    pub fn new(doc: D, timeout: Duration) -> Self {
        Self {
            doc,
            summary: DEFAULT_EDIT_SUMMARY.to_string(),
            timeout,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn document(&self) -> &D {
        &self.doc
    }

    /// Persist one report on its alert page.
    pub async fn append(&self, rev: &SuspiciousRev) -> Result<(), AlertError> {
        let page = rev.alert_page.as_str();
        let line = rev.to_wikitext();

        let out = self.try_append(page, &line).await;
        let out = match out {
            Err(AlertError::Conflict { .. }) => {
                warn!(target: "alerts", page, title = %rev.title, "edit conflict, retrying once");
                self.try_append(page, &line).await
            }
            other => other,
        };

        match &out {
            Ok(()) => info!(target: "alerts", page, title = %rev.title, revision = rev.revision.new, "alert appended"),
            Err(e) => {
                counter!("alert_write_failures_total").increment(1);
                warn!(target: "alerts", page, error = %e, "alert append failed");
            }
        }
        out
    }

    async fn try_append(&self, page: &str, line: &str) -> Result<(), AlertError> {
        let current = self.timed(page, self.doc.read(page)).await?;
        let text = match &current {
            Some(snap) => insert_after_anchor(&snap.text, line).ok_or_else(|| {
                AlertError::MissingAnchor {
                    page: page.to_string(),
                }
            })?,
            None => format!("{ALERT_ANCHOR}\n{line}\n"),
        };
        self.timed(
            page,
            self.doc.write(page, &text, current.as_ref(), &self.summary),
        )
        .await
    }

    async fn timed<T>(
        &self,
        page: &str,
        fut: impl std::future::Future<Output = Result<T, DocumentError>>,
    ) -> Result<T, AlertError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => Err(AlertError::Timeout {
                page: page.to_string(),
                timeout: self.timeout,
            }),
            Ok(Ok(v)) => Ok(v),
            Ok(Err(DocumentError::Conflict(_))) => Err(AlertError::Conflict {
                page: page.to_string(),
            }),
            Ok(Err(DocumentError::Permission(reason))) => Err(AlertError::Permission {
                page: page.to_string(),
                reason,
            }),
            Ok(Err(source)) => Err(AlertError::Document {
                page: page.to_string(),
                source,
            }),
        }
    }
}
