//! Recent-changes feed: Server-Sent Events decoding, record validation and the
//! reconnecting EventStreams client.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ChangeEvent, Revision};
use crate::retry::RetryPolicy;

pub const DEFAULT_STREAM_URL: &str = "https://stream.wikimedia.org/v2/stream/recentchange";
pub const DEFAULT_SERVER_NAME: &str = "en.wikipedia.org";

#[derive(Debug, Error)]
pub enum StreamError {
    /// One record could not be decoded or lacks required fields; skip it.
    #[error("malformed change record: {0}")]
    Malformed(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRevision {
    pub old: Option<u64>,
    pub new: Option<u64>,
}

/// A recent-change record as it arrives on the wire. Everything is optional
/// until [`RawChange::into_change`] validates it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChange {
    pub title: Option<String>,
    pub user: Option<String>,
    pub revision: Option<RawRevision>,
    pub timestamp: Option<i64>,
    pub server_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub namespace: Option<i64>,
    pub bot: Option<bool>,
}

impl RawChange {
    pub fn parse(data: &str) -> Result<Self, StreamError> {
        serde_json::from_str(data).map_err(|e| StreamError::Malformed(e.to_string()))
    }

    /// Check required fields and build the event the pipeline works on.
    pub fn into_change(self) -> Result<ChangeEvent, StreamError> {
        let missing = |field: &str| StreamError::Malformed(format!("missing {field}"));
        let title = self.title.filter(|t| !t.is_empty()).ok_or_else(|| missing("title"))?;
        let user = self.user.ok_or_else(|| missing("user"))?;
        let rev = self.revision.ok_or_else(|| missing("revision"))?;
        let old = rev.old.ok_or_else(|| missing("revision.old"))?;
        let new = rev.new.ok_or_else(|| missing("revision.new"))?;
        let timestamp = self.timestamp.ok_or_else(|| missing("timestamp"))?;
        Ok(ChangeEvent {
            title,
            user,
            revision: Revision { old, new },
            timestamp,
        })
    }
}

/// Which records are worth diffing: human edits to articles on one wiki.
#[derive(Debug, Clone)]
pub struct StreamFilter {
    pub server_name: String,
}

impl Default for StreamFilter {
    fn default() -> Self {
        Self {
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl StreamFilter {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    pub fn accepts(&self, raw: &RawChange) -> bool {
        raw.server_name.as_deref() == Some(self.server_name.as_str())
            && raw.kind.as_deref() == Some("edit")
            && raw.namespace == Some(0)
            && raw.bot == Some(false)
    }
}

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Feed it raw chunks; it hands back
/// every event completed by a blank line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).into_owned();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    out.push(SseEvent {
                        id: self.last_id.clone(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "data" => self.data.push(value.to_string()),
                "id" => self.last_id = Some(value.to_string()),
                _ => {}
            }
        }
        out
    }

    /// Id of the last event seen, for `Last-Event-ID` on reconnect.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Drop any half-received event; the last id survives.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.data.clear();
    }
}

/// Ordered supply of change records.
#[async_trait]
pub trait ChangeSource: Send {
    /// Next record in arrival order; `Ok(None)` once the source is exhausted.
    async fn next_record(&mut self) -> Result<Option<RawChange>, StreamError>;
}

/// Fixed list of records, replayed in order. Used for replays and tests.
#[derive(Debug, Default)]
pub struct VecSource {
    records: VecDeque<Result<RawChange, String>>,
}

impl VecSource {
    pub fn new(records: impl IntoIterator<Item = RawChange>) -> Self {
        Self {
            records: records.into_iter().map(Ok).collect(),
        }
    }

    /// Queue a record that will surface as [`StreamError::Malformed`].
    pub fn push_malformed(&mut self, reason: impl Into<String>) {
        self.records.push_back(Err(reason.into()));
    }

    pub fn push(&mut self, raw: RawChange) {
        self.records.push_back(Ok(raw));
    }
}

#[async_trait]
impl ChangeSource for VecSource {
    async fn next_record(&mut self) -> Result<Option<RawChange>, StreamError> {
        match self.records.pop_front() {
            Some(Ok(raw)) => Ok(Some(raw)),
            Some(Err(reason)) => Err(StreamError::Malformed(reason)),
            None => Ok(None),
        }
    }
}

/// Wikimedia EventStreams client. Reconnects forever with capped backoff and
/// resumes from the last event id it saw.
pub struct EventStreamSource {
    client: reqwest::Client,
    url: String,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    response: Option<reqwest::Response>,
    backoff: RetryPolicy,
    failures: u32,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl EventStreamSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            response: None,
            backoff: RetryPolicy {
                attempts: u32::MAX,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(60),
            },
            failures: 0,
            connect_timeout: timeout,
            idle_timeout: timeout.max(Duration::from_secs(60)),
        }
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.backoff.base_delay = base_delay;
        self.backoff.max_delay = max_delay;
        self
    }

    async fn connect(&mut self) {
        self.decoder.reset();
        let mut rb = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream");
        if let Some(id) = self.decoder.last_event_id().filter(|id| id.is_ascii()) {
            rb = rb.header("Last-Event-ID", id);
        }

        match tokio::time::timeout(self.connect_timeout, rb.send()).await {
            Ok(Ok(resp)) if resp.status().is_success() => {
                info!(target: "stream", url = %self.url, resumed = self.decoder.last_event_id().is_some(), "connected to change stream");
                self.failures = 0;
                self.response = Some(resp);
            }
            Ok(Ok(resp)) => {
                warn!(target: "stream", status = %resp.status(), "change stream refused connection");
                self.wait().await;
            }
            Ok(Err(e)) => {
                warn!(target: "stream", error = %e, "change stream connection failed");
                self.wait().await;
            }
            Err(_) => {
                warn!(target: "stream", timeout = ?self.connect_timeout, "change stream connection timed out");
                self.wait().await;
            }
        }
    }

    async fn wait(&mut self) {
        self.failures = self.failures.saturating_add(1);
        let delay = self.backoff.delay_for(self.failures);
        debug!(target: "stream", failures = self.failures, ?delay, "backing off before reconnect");
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl ChangeSource for EventStreamSource {
    async fn next_record(&mut self) -> Result<Option<RawChange>, StreamError> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return RawChange::parse(&ev.data).map(Some);
            }
            if self.response.is_none() {
                self.connect().await;
                continue;
            }
            let Some(resp) = self.response.as_mut() else {
                continue;
            };
            match tokio::time::timeout(self.idle_timeout, resp.chunk()).await {
                Ok(Ok(Some(bytes))) => {
                    let events = self.decoder.push(&bytes);
                    self.pending.extend(events);
                }
                Ok(Ok(None)) => {
                    info!(target: "stream", "change stream closed by server; reconnecting");
                    self.response = None;
                }
                Ok(Err(e)) => {
                    warn!(target: "stream", error = %e, "change stream read failed; reconnecting");
                    self.response = None;
                    self.wait().await;
                }
                Err(_) => {
                    warn!(target: "stream", idle = ?self.idle_timeout, "change stream went quiet; reconnecting");
                    self.response = None;
                }
            }
        }
    }
}
