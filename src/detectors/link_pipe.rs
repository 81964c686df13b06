//! Piped links whose display text hides the macrons of the target title,
//! e.g. `[[Whanāu|family]]` or `[[Kākāpō|Kākapo]]`.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Detector, DEFAULT_LINK_ALERT_PAGE};
use crate::articles::ArticleCache;
use crate::macrons::{count_macrons, macron_histogram};
use crate::model::{ChangeEvent, DiffContext, SuspiciousRev};

static PIPED_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]|]+)\|([^\[\]]*)\]\]").expect("piped link regex"));

/// When a piped link counts as hiding macrons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPipePolicy {
    /// Display keeps none of the macron vowels present in the target.
    Stripped,
    /// Display has strictly fewer macron vowels than the target.
    #[default]
    Fewer,
}

impl LinkPipePolicy {
    pub fn fires(self, target: &str, display: &str) -> bool {
        if display.trim().is_empty() {
            return false;
        }
        match self {
            Self::Fewer => count_macrons(&[display]) < count_macrons(&[target]),
            Self::Stripped => {
                let t = macron_histogram(target);
                let d = macron_histogram(display);
                t.iter().any(|&n| n > 0) && t.iter().zip(d).all(|(&tn, dn)| tn == 0 || dn == 0)
            }
        }
    }
}

impl FromStr for LinkPipePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fewer" | "partial" => Ok(Self::Fewer),
            "stripped" | "complete" => Ok(Self::Stripped),
            other => bail!("unknown link pipe policy: {other}"),
        }
    }
}

/// All `[[target|display]]` pairs in `text` whose target contains a macron vowel.
pub fn macroned_piped_links(text: &str) -> Vec<(&str, &str)> {
    PIPED_LINK
        .captures_iter(text)
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
        .filter(|(target, _)| count_macrons(&[*target]) > 0)
        .collect()
}

pub struct UnmacronedLinkDetector {
    alert_page: String,
    articles: Arc<ArticleCache>,
    policy: LinkPipePolicy,
}

impl UnmacronedLinkDetector {
    pub fn new(articles: Arc<ArticleCache>) -> Self {
        Self {
            alert_page: DEFAULT_LINK_ALERT_PAGE.to_string(),
            articles,
            policy: LinkPipePolicy::default(),
        }
    }

    pub fn with_alert_page(mut self, page: impl Into<String>) -> Self {
        self.alert_page = page.into();
        self
    }

    pub fn with_policy(mut self, policy: LinkPipePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Detector for UnmacronedLinkDetector {
    fn id(&self) -> &'static str {
        "unmacroned-link"
    }

    fn detect(&self, change: &ChangeEvent, diff: &DiffContext) -> Option<SuspiciousRev> {
        // one snapshot for the whole call
        let articles = self.articles.snapshot();
        // Ordered by (target, display), not by the rendered `[[target|display]]` text;
        // the two differ when one target is a prefix of another ("A" vs "Ab").
        let mut pairs = BTreeSet::new();
        for hunk in &diff.added_context {
            for (target, display) in macroned_piped_links(hunk) {
                if self.policy.fires(target, display) && articles.contains(target) {
                    pairs.insert((target, display));
                }
            }
        }
        if pairs.is_empty() {
            return None;
        }

        let rendered = pairs
            .iter()
            .map(|(t, d)| html_escape::encode_text(&format!("[[{t}|{d}]]")).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        Some(SuspiciousRev::for_change(
            &self.alert_page,
            change,
            format!("linkpipe over macrons in link to WPNZ article(s) '''(<nowiki>{rendered}</nowiki>)'''"),
        ))
    }
}
