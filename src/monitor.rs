//! Orchestrator: consume the change feed strictly in order, diff each accepted edit,
//! run the detector chain and file every report.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertDocument, AlertError, AlertSink};
use crate::detectors::DetectorChain;
use crate::diff::{DiffError, DiffProvider};
use crate::model::{ChangeEvent, DiffContext};
use crate::retry::RetryPolicy;
use crate::stream::{ChangeSource, StreamError, StreamFilter};

/// Counters of one [`Monitor::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Records that passed the filter and were handled.
    pub processed: u64,
    /// Records dropped as malformed.
    pub dropped: u64,
    /// Reports produced by the detector chain.
    pub detections: u64,
}

pub struct Monitor {
    diffs: Arc<dyn DiffProvider>,
    chain: DetectorChain,
    sink: AlertSink<Arc<dyn AlertDocument>>,
    filter: StreamFilter,
    diff_timeout: Duration,
    diff_retry: RetryPolicy,
}

impl Monitor {
    pub fn new(
        diffs: Arc<dyn DiffProvider>,
        chain: DetectorChain,
        sink: AlertSink<Arc<dyn AlertDocument>>,
    ) -> Self {
        Self {
            diffs,
            chain,
            sink,
            filter: StreamFilter::default(),
            diff_timeout: Duration::from_secs(30),
            diff_retry: RetryPolicy::default(),
        }
    }

    pub fn with_filter(mut self, filter: StreamFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_diff_limits(mut self, timeout: Duration, retry: RetryPolicy) -> Self {
        self.diff_timeout = timeout;
        self.diff_retry = retry;
        self
    }

    pub fn chain(&self) -> &DetectorChain {
        &self.chain
    }

    /// Process one accepted edit end to end. Returns the number of reports.
    ///
    /// A diff that cannot be fetched drops the edit; a report that cannot be
    /// written is logged and skipped. Only a fatal alert failure is returned.
    pub async fn handle_change(&self, change: &ChangeEvent) -> Result<usize, AlertError> {
        let started = Instant::now();
        gauge!("change_stream_lag_seconds").set(change.lag_secs(Utc::now()));

        let diff = match self.fetch_diff(change).await {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    target: "monitor",
                    title = %change.title,
                    old = change.revision.old,
                    new = change.revision.new,
                    error = %e,
                    "could not fetch diff; dropping edit"
                );
                counter!("changes_dropped_total", "reason" => "diff").increment(1);
                return Ok(0);
            }
        };

        let reports = self.chain.run(change, &diff);
        for rev in &reports {
            if let Err(e) = self.sink.append(rev).await {
                if e.is_fatal() {
                    error!(target: "monitor", error = %e, "alert sink unusable");
                    return Err(e);
                }
                error!(target: "monitor", title = %rev.title, error = %e, "dropping alert");
            }
        }

        histogram!("change_processing_seconds").record(started.elapsed().as_secs_f64());
        counter!("changes_processed_total").increment(1);
        debug!(target: "monitor", title = %change.title, reports = reports.len(), "edit processed");
        Ok(reports.len())
    }

    async fn fetch_diff(&self, change: &ChangeEvent) -> Result<DiffContext, DiffError> {
        let diffs = self.diffs.as_ref();
        let limit = self.diff_timeout;
        let (old, new) = (change.revision.old, change.revision.new);
        self.diff_retry
            .run(
                move |_| async move {
                    match tokio::time::timeout(limit, diffs.fetch_diff(old, new)).await {
                        Ok(out) => out,
                        Err(_) => Err(DiffError::Transport(anyhow!(
                            "diff {old}..{new} timed out after {limit:?}"
                        ))),
                    }
                },
                DiffError::is_transient,
            )
            .await
    }

    /// Drain `source` until it ends or `shutdown` flips to `true`. Records are
    /// handled one at a time, in arrival order.
    pub async fn run<S>(
        &self,
        source: &mut S,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<RunStats>
    where
        S: ChangeSource + ?Sized,
    {
        let mut stats = RunStats::default();
        info!(target: "monitor", detectors = ?self.chain.ids(), server = %self.filter.server_name, "monitoring recent changes");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                rec = source.next_record() => rec,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    info!(target: "monitor", "change feed ended");
                    break;
                }
                Err(StreamError::Malformed(reason)) => {
                    warn!(target: "monitor", %reason, "skipping malformed record");
                    counter!("changes_dropped_total", "reason" => "malformed").increment(1);
                    stats.dropped += 1;
                    continue;
                }
                Err(StreamError::Transport(e)) => {
                    warn!(target: "monitor", error = %e, "change feed error");
                    continue;
                }
            };

            if !self.filter.accepts(&raw) {
                continue;
            }
            let change = match raw.into_change() {
                Ok(c) => c,
                Err(e) => {
                    warn!(target: "monitor", error = %e, "skipping incomplete record");
                    counter!("changes_dropped_total", "reason" => "malformed").increment(1);
                    stats.dropped += 1;
                    continue;
                }
            };

            stats.processed += 1;
            let found = self
                .handle_change(&change)
                .await
                .context("alert sink failed fatally")?;
            stats.detections += found as u64;
        }

        info!(
            target: "monitor",
            processed = stats.processed,
            dropped = stats.dropped,
            detections = stats.detections,
            "monitor stopped"
        );
        Ok(stats)
    }
}
