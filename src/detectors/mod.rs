//! Detector chain.
//!
//! Each detector is a pure function of (change, diff, current article snapshot) that
//! yields at most one report. Detectors are independent: the chain runs all of them
//! against the same diff and keeps every report, in chain order.

pub mod link_pipe;
pub mod maori_words;
pub mod removed_macrons;

use std::panic::{catch_unwind, AssertUnwindSafe};

use metrics::counter;
use tracing::{error, info};

use crate::model::{ChangeEvent, DiffContext, SuspiciousRev};

pub use link_pipe::{LinkPipePolicy, UnmacronedLinkDetector};
pub use maori_words::{MaoriWordDetector, WordMatcher};
pub use removed_macrons::RemovedMacronDetector;

/// Default alert page for word and macron-count alerts.
pub const DEFAULT_ALERT_PAGE: &str = "User:MacronMonitor/Alerts";
/// Default alert page for link-pipe alerts.
pub const DEFAULT_LINK_ALERT_PAGE: &str = "User:MacronMonitor/LinkAlerts";

/// Capability every detector implements.
pub trait Detector: Send + Sync {
    /// Stable identifier, used in logs and metric labels.
    fn id(&self) -> &'static str;

    /// Inspect one edit. Must not panic for any diff, but the chain isolates it if it does.
    fn detect(&self, change: &ChangeEvent, diff: &DiffContext) -> Option<SuspiciousRev>;
}

/// Ordered, fixed list of detectors.
#[derive(Default)]
pub struct DetectorChain {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorChain {
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    pub fn with(mut self, detector: impl Detector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.id()).collect()
    }

    /// Run every detector; a panicking detector counts as "no detection" and the rest
    /// still run.
    pub fn run(&self, change: &ChangeEvent, diff: &DiffContext) -> Vec<SuspiciousRev> {
        let mut out = Vec::new();
        for d in &self.detectors {
            match catch_unwind(AssertUnwindSafe(|| d.detect(change, diff))) {
                Ok(Some(rev)) => {
                    info!(
                        target: "detectors",
                        detector = d.id(),
                        title = %rev.title,
                        revision = rev.revision.new,
                        reason = %rev.reason,
                        "detected a suspicious edit"
                    );
                    counter!("suspicious_edits_detected", "detector" => d.id()).increment(1);
                    out.push(rev);
                }
                Ok(None) => {}
                Err(_) => {
                    error!(
                        target: "detectors",
                        detector = d.id(),
                        title = %change.title,
                        revision = change.revision.new,
                        "detector panicked; treating as no detection"
                    );
                    counter!("detector_failures_total", "detector" => d.id()).increment(1);
                }
            }
        }
        out
    }
}
