//! Value types that flow through the detection pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Old/new revision ids of one edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision {
    pub old: u64,
    pub new: u64,
}

/// One validated edit from the recent-changes stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub title: String,
    pub user: String,
    pub revision: Revision,
    /// Unix seconds, as sent by the stream.
    pub timestamp: i64,
}

impl ChangeEvent {
    pub fn new(title: impl Into<String>, user: impl Into<String>, old: u64, new: u64) -> Self {
        Self {
            title: title.into(),
            user: user.into(),
            revision: Revision { old, new },
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Seconds between `now` and the event timestamp (never negative).
    pub fn lag_secs(&self, now: DateTime<Utc>) -> f64 {
        (now.timestamp() - self.timestamp).max(0) as f64
    }
}

/// Normalized diff of one edit: added and removed hunks in diff order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffContext {
    pub added_context: Vec<String>,
    pub removed_context: Vec<String>,
}

impl DiffContext {
    pub fn new<A, R>(added: A, removed: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            added_context: added.into_iter().map(Into::into).collect(),
            removed_context: removed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_context.is_empty() && self.removed_context.is_empty()
    }
}

/// Output of one detector firing on one edit. Field-wise equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuspiciousRev {
    /// Page that receives the alert line.
    pub alert_page: String,
    pub title: String,
    pub user: String,
    pub revision: Revision,
    /// Wiki markup, rendered verbatim into the alert line.
    pub reason: String,
}

impl SuspiciousRev {
    pub fn for_change(alert_page: &str, change: &ChangeEvent, reason: String) -> Self {
        Self {
            alert_page: alert_page.to_string(),
            title: change.title.clone(),
            user: change.user.clone(),
            revision: change.revision,
            reason,
        }
    }

    /// Render as one alert line. Pure and deterministic.
    pub fn to_wikitext(&self) -> String {
        format!(
            "* ~~~~~ ({{{{diff2|{new}|diff}}}}) — '''[[{title}]]''' — [[User:{user}|{user}]] ([[User_talk:{user}|talk]] | [[Special:Contributions/{user}|contribs]]) — reason: ''{reason}''",
            new = self.revision.new,
            title = self.title,
            user = self.user,
            reason = self.reason,
        )
    }
}
